// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Capacity of the event bus channel.
///
/// Producers never wait on the bus: when it is full, new events are dropped.
pub(crate) const MAX_EVENTS: usize = 100;
