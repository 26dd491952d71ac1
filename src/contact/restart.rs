//! Restart (de)serialization of contact records.
//!
//! The records of a locator are stored as a map from secondary node id to
//! [`PenetrationInfo`], in increasing node order, through any serde data format chosen by
//! the host.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

use crate::contact::PenetrationInfo;
use crate::mesh::NodeId;
use crate::utils::hashmap::HashMap;

/// Writes the contact records of `infos`.
pub fn data_store<S: Serializer>(
    infos: &HashMap<NodeId, PenetrationInfo>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let sorted: BTreeMap<NodeId, &PenetrationInfo> =
        infos.iter().map(|(node, info)| (*node, info)).collect();
    serializer.collect_map(sorted)
}

/// Reads contact records written by [`data_store`].
///
/// Fails if a record is stored under another node than its own.
pub fn data_load<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<NodeId, PenetrationInfo>, D::Error> {
    let stored = BTreeMap::<NodeId, PenetrationInfo>::deserialize(deserializer)?;
    let mut infos = HashMap::default();
    for (node, info) in stored {
        if info.node != node {
            return Err(D::Error::custom(format_args!(
                "the contact record of node {} is stored under node {}",
                info.node, node
            )));
        }
        let _ = infos.insert(node, info);
    }
    Ok(infos)
}
