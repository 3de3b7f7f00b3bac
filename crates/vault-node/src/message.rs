//! The wire-level envelope payload: a closed sum type over every persona's
//! own message type, so a single inbound byte stream can be demultiplexed
//! to the right persona's inbox without the routing layer (out of scope)
//! knowing anything about persona boundaries.

use serde::{Deserialize, Serialize};

use vault_persona::{
    DataManagerMessage, MaidManagerMessage, PmidManagerMessage, PmidNodeMessage,
    VersionHandlerMessage,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VaultMessage {
    MaidManager(MaidManagerMessage),
    DataManager(DataManagerMessage),
    PmidManager(PmidManagerMessage),
    PmidNode(PmidNodeMessage),
    VersionHandler(VersionHandlerMessage),
}
