//! Peer discovery: the XOR keyspace, the contact store and the DHT client
//! contract the router depends on.

pub mod dht_key;
pub mod lookup;
pub mod node_db;
pub mod peer_discovery;

pub use dht_key::DhtKey;
pub use lookup::{LookupState, LookupTable, PendingLookup};
pub use node_db::{load_contacts, persist_contacts, ContactStore, InsertOutcome, NodeDb, NodeDbError};
pub use peer_discovery::{DiscoveryTick, LookupOutcome, PeerDiscovery};
