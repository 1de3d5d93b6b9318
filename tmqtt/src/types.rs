use std::num::NonZeroU16;

pub use tmqtt_codec::v3::{
    Connect, ConnectAck, ConnectAckReason, LastWill, Packet, SubscribeReturnCode,
};
pub use tmqtt_codec::{Protocol, Publish, QoS, MQTT_LEVEL_31, MQTT_LEVEL_311};
pub use tmqtt_utils::TimestampMillis;

pub type ConnectionId = u64;
pub type ClientId = bytestring::ByteString;
pub type UserName = bytestring::ByteString;
pub type PacketId = NonZeroU16;
/// Subscription pattern, may contain `+` and `#`
pub type TopicFilter = bytestring::ByteString;

pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;
