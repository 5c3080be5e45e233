//! Consumers act on a computed [`crate::situation::Budget`], driving whatever
//! downstream hardware or protocol the deployment needs.

mod p1_telegram;

pub use p1_telegram::{FileSink, P1TelegramConsumer, TelegramSink};
