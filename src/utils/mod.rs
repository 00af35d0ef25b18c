pub mod cancel;
pub mod paths;
pub mod subprocess;
