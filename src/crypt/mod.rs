mod consts;

pub mod blowfish;
pub mod stream;

pub use blowfish::Blowfish;
pub use stream::BlowfishStream;
