pub(crate) mod analyze;
pub(crate) mod helpers;
pub(crate) mod stats;
