// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Capabilities available to the headless command-line node.
//!
//! A process running in a terminal has no camera pipeline, canvas or screen
//! recorder to offer. It is always "foreground" and can serve
//! `location.get` from a fixed coordinate in the config file.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tether_config::{LocationMode, NodeConfig, StaticLocation};
use tether_node::dispatch::{
    CapabilityError, HostState, LocationCapability, LocationFix, Permission,
};
use tether_node::protocol::commands::LocationAccuracy;
use tether_node::{Capabilities, CommandDispatcher, DispatchPolicy};

pub struct HeadlessHost {
    location_granted: bool,
}

impl HeadlessHost {
    pub fn new(location_granted: bool) -> Self {
        Self { location_granted }
    }
}

impl HostState for HeadlessHost {
    fn is_foreground(&self) -> bool {
        true
    }

    fn permissions(&self) -> BTreeMap<String, bool> {
        BTreeMap::from([
            (Permission::Camera.to_string(), false),
            (Permission::Location.to_string(), self.location_granted),
        ])
    }
}

/// Serves a configured coordinate as the current fix.
pub struct FixedLocation {
    spot: StaticLocation,
}

impl FixedLocation {
    pub fn new(spot: StaticLocation) -> Self {
        Self { spot }
    }
}

#[async_trait]
impl LocationCapability for FixedLocation {
    async fn current_fix(&self, accuracy: LocationAccuracy) -> Result<LocationFix, CapabilityError> {
        Ok(LocationFix {
            lat: self.spot.lat,
            lon: self.spot.lon,
            accuracy_meters: self.spot.accuracy_meters,
            altitude_meters: self.spot.altitude_meters,
            speed_mps: None,
            heading_deg: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_precise: accuracy == LocationAccuracy::Precise && self.spot.accuracy_meters <= 20.0,
            source: "static".to_string(),
        })
    }
}

/// Build the dispatcher for this process from the `node` config section.
pub fn headless_dispatcher(node: &NodeConfig) -> CommandDispatcher {
    let location = node
        .static_location
        .clone()
        .filter(|_| node.location_mode != LocationMode::Off);
    let host = Arc::new(HeadlessHost::new(location.is_some()));
    let mut caps = Capabilities::new(host);
    if let Some(spot) = location {
        caps = caps.with_location(Arc::new(FixedLocation::new(spot)));
    }
    CommandDispatcher::new(caps, DispatchPolicy::from_config(node))
}
