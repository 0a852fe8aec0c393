pub mod addr;

pub use addr::normalize_listen_addr;
