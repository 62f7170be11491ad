pub mod consume;
pub mod dispatch;
pub mod publish;
