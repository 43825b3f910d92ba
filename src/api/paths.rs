//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub const PEERS: &str = "/peers";
pub const STATUS: &str = "/status";
pub const LEAVE: &str = "/leave";

pub mod resource {
    pub const ACQUIRE: &str = "/resource/acquire";
    pub const RELEASE: &str = "/resource/release";
}

pub fn drop_leading_slash(path: &str) -> &str {
    if let Some(stripped) = path.strip_prefix('/') {
        stripped
    } else {
        path
    }
}
