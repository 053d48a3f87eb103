//! Architecture format providers
//!
//! One module per translation-table format, each supplying the
//! [`crate::traits::Geometry`] constants, the descriptor codec, and the
//! enable-step register computation for that format. The formats share no
//! code on purpose; their bit layouts only look alike until they don't.

pub mod arm32_lpae;
pub mod arm32_short;
pub mod arm64;

pub use arm32_lpae::Arm32Lpae;
pub use arm32_short::Arm32Short;
pub use arm64::Arm64;
