use crate::{define_id_type, define_name_type};

define_id_type!(RequestId, u64);
define_id_type!(ResourceId, u64);
define_id_type!(GroupId, u32);

define_name_type!(UserId);
define_name_type!(ResourceType);
