#![deny(
    rust_2018_idioms,
    unreachable_pub,
    unsafe_code,
    unused_imports,
    unused_mut,
    missing_debug_implementations
)]

pub mod archive;
pub mod crypt;
pub mod error;
pub mod resource;
pub mod util;

pub const ONE_MB: usize = 1 << 20;
