pub mod builder;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod matching;
pub mod pipeline;
pub mod protocol;
pub mod sandbox;
pub mod testers;
pub mod tls;
