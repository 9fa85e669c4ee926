//! 도메인 레코드.

pub mod candle;
pub mod dart;
pub mod judal;
pub mod news;
pub mod run;

pub use candle::*;
pub use dart::*;
pub use judal::*;
pub use news::*;
pub use run::*;
