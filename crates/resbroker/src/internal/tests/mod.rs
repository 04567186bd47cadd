#[cfg(test)]
mod test_reactor;

pub mod utils;
