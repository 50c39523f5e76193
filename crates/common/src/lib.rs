// gitserve-common: shared request-path and locator handling for the gitserve workspace

pub mod locator;
pub mod path;
