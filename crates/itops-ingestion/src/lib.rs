//! # ITOps Ingestion
//!
//! Everything between an upstream alert and a [`RawEvent`](itops_core::model::RawEvent):
//!
//! - **Streams**: consumer and publisher capabilities, the in-process broker
//!   and the optional Kafka transport (`kafka` feature)
//! - **Standardizers**: the source-type registry and the Zabbix webhook adapter
//! - **Object cache**: entity name to object type and id, refreshed from the
//!   knowledge graph

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod object_cache;
pub mod standardizer;
pub mod stream;

pub use object_cache::{EntityObjectInfo, ObjectClassCache, ObjectLookup, StaticObjects};
pub use standardizer::{Standardizer, StandardizerContext, StandardizerRegistry};
pub use stream::{
    Message, MessageConsumer, MessageHandler, MessagePublisher, StreamError, StreamFactory,
};

/// Commonly used items
pub mod prelude {
    pub use crate::object_cache::{ObjectClassCache, ObjectLookup};
    pub use crate::standardizer::{Standardizer, StandardizerContext, StandardizerRegistry};
    pub use crate::stream::{
        MemoryBroker, Message, MessageConsumer, MessageHandler, MessagePublisher, StreamError,
        StreamFactory,
    };
}
