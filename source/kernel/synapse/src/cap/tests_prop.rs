// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the channel registry
//! OWNERS: @kernel-cap-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCENARIOS:
//!   - live_handles_are_unique(): no two live handles name the same slot, lookups stay exact
//!   - released_handle_is_reused_lowest_first(): allocation always picks the lowest free handle

use alloc::vec::Vec;

use super::{CapError, ChannelTable};
use crate::types::{ChannelId, Cid};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Open,
    Close(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![Just(Op::Open), (0usize..16).prop_map(Op::Close)],
        0..64,
    )
}

proptest! {
    #[test]
    fn live_handles_are_unique(ops in arb_ops()) {
        let mut table = ChannelTable::with_capacity(8);
        let mut live: Vec<(Cid, ChannelId)> = Vec::new();
        let mut next = 0u32;
        for op in ops {
            match op {
                Op::Open => match table.vacant() {
                    Some(cid) => {
                        prop_assert!(live.iter().all(|(c, _)| *c != cid));
                        let id = ChannelId::new(next, 0);
                        next += 1;
                        table.insert(cid, id).unwrap();
                        live.push((cid, id));
                    }
                    None => prop_assert_eq!(live.len(), 8),
                },
                Op::Close(pick) => {
                    if live.is_empty() {
                        continue;
                    }
                    let (cid, id) = live.swap_remove(pick % live.len());
                    prop_assert_eq!(table.release(cid), Ok(id));
                    prop_assert_eq!(table.get(cid), Err(CapError::InvalidSlot));
                }
            }
            for (cid, id) in &live {
                prop_assert_eq!(table.get(*cid), Ok(*id));
            }
            prop_assert_eq!(table.len(), live.len());
        }
    }

    #[test]
    fn released_handle_is_reused_lowest_first(count in 1usize..8, victim in 0usize..8) {
        let mut table = ChannelTable::with_capacity(8);
        for n in 0..count {
            let cid = table.vacant().unwrap();
            table.insert(cid, ChannelId::new(n as u32, 0)).unwrap();
        }
        let victim = Cid::new((victim % count) as u32 + 1).unwrap();
        table.release(victim).unwrap();
        prop_assert_eq!(table.vacant(), Some(victim));
    }
}
