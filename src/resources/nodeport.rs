//! Node port plan for externally exposed brokers
//!
//! Ports are a pure function of the broker's ordinal and the mechanism's
//! position in [`SECURITY_MECHANISMS`], so a broker gets the same port on
//! every pass and after every restart without reading cluster state.
//!
//! ```text
//! 30000 ─┬─ bootstrap services:  NODEPORT_BASE + mechanism index
//!        │
//! 31000 ─┼─ broker listeners:    NODEPORT_BASE + BROKER_PORT_OFFSET
//!        │                         + ordinal * PORTS_PER_BROKER + mechanism index
//! 32759 ─┴─ last broker port (ordinal 175, mechanism slot 9)
//! ```
//!
//! Each ordinal owns a disjoint block of `PORTS_PER_BROKER` ports and the
//! mechanism index is strictly below that block size, so distinct
//! `(ordinal, mechanism)` pairs never share a port. Bootstrap ports sit below
//! `BROKER_PORT_OFFSET` and cannot collide with broker ports either.

use crate::controller::error::{Error, Result};
use crate::state::models::{SECURITY_MECHANISMS, SecurityMechanism};

/// First port of the Kubernetes default node port range
pub const NODEPORT_BASE: i32 = 30000;

/// Last port of the Kubernetes default node port range
pub const NODEPORT_MAX: i32 = 32767;

/// Offset of the broker listener block from [`NODEPORT_BASE`]
pub const BROKER_PORT_OFFSET: i32 = 1000;

/// Ports reserved per broker ordinal; also the mechanism capacity
pub const PORTS_PER_BROKER: i32 = 10;

/// Number of broker ordinals that fit in the range (`0..MAX_BROKER_ORDINALS`)
pub const MAX_BROKER_ORDINALS: u32 =
    ((NODEPORT_MAX - NODEPORT_BASE - BROKER_PORT_OFFSET + 1) / PORTS_PER_BROKER) as u32;

const _: () = assert!(SECURITY_MECHANISMS.len() as i32 <= PORTS_PER_BROKER);
const _: () = assert!(SECURITY_MECHANISMS.len() as i32 <= BROKER_PORT_OFFSET);

/// Node port of a broker's listener service for `mechanism`
pub fn listener_node_port(unit_id: u32, mechanism: SecurityMechanism) -> Result<i32> {
    if unit_id >= MAX_BROKER_ORDINALS {
        return Err(Error::NodePortOutOfRange(format!(
            "unit ordinal {} exceeds the supported maximum of {}",
            unit_id,
            MAX_BROKER_ORDINALS - 1
        )));
    }

    let port = NODEPORT_BASE
        + BROKER_PORT_OFFSET
        + unit_id as i32 * PORTS_PER_BROKER
        + mechanism.index() as i32;

    debug_assert!(port <= NODEPORT_MAX);
    Ok(port)
}

/// Node port of the application-wide bootstrap service for `mechanism`
pub fn bootstrap_node_port(mechanism: SecurityMechanism) -> i32 {
    NODEPORT_BASE + mechanism.index() as i32
}
