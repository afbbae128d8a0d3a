pub mod config;
pub mod error;
pub mod events;
pub mod exchanges;
pub mod model;
pub mod order_book;
pub mod orchestrator;
pub mod recv_seq;
pub mod sync;
pub mod transport;
pub mod writer;
