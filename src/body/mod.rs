//! Request body decoding and response body encoding pipelines.

pub(crate) mod decode;
pub(crate) mod encode;

pub use self::decode::BodyReader;
pub use self::encode::BodyWriter;
