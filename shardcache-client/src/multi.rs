//  Copyright 2026 shardcache-rs contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Multi-key batching (`get_multi`/`set_multi`).
//!
//! Items are grouped by owning node, one connection per owner carries
//! every command for that owner, and all owners are driven concurrently
//! via `tokio::task::JoinSet`; each owner's commands are sent and read
//! back in sequence over its one borrowed connection. Per-item status is
//! preserved within a group, but the whole batch returns `Err` if any
//! owner group failed.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use shardcache_common::{Error, Outcome, Result};
use shardcache_net::{Frame, Opcode};
use tokio::task::JoinSet;

use crate::client::{response_payload, roundtrip, status_ok, Client, PeerPool};
use crate::ring::Node;
use std::sync::Arc;

/// Outer deadline for one `get_multi`/`set_multi` call, regardless of how
/// many owner groups it spans.
const MULTI_TIMEOUT: Duration = Duration::from_secs(1);

fn group_by_owner(client: &Client, keys: &[Vec<u8>]) -> Result<HashMap<String, (Node, Vec<usize>)>> {
    let mut groups: HashMap<String, (Node, Vec<usize>)> = HashMap::new();
    for (idx, key) in keys.iter().enumerate() {
        let node = client.node_for_key(key)?;
        groups
            .entry(node.label.clone())
            .or_insert_with(|| (node.clone(), Vec::new()))
            .1
            .push(idx);
    }
    Ok(groups)
}

async fn pipeline_get(pool: Arc<PeerPool>, keys: Vec<Vec<u8>>) -> Result<Vec<Option<Vec<u8>>>> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let frame = Frame::new(Opcode::Get, vec![Bytes::from(key)]);
        let resp = roundtrip(&pool, &frame).await?;
        out.push(response_payload(resp));
    }
    Ok(out)
}

async fn pipeline_set(pool: Arc<PeerPool>, items: Vec<(Vec<u8>, Vec<u8>, u32)>) -> Result<Vec<bool>> {
    let mut out = Vec::with_capacity(items.len());
    for (key, value, expire_secs) in items {
        let frame = Frame::new(
            Opcode::Set,
            vec![Bytes::from(key), Bytes::from(value), Bytes::copy_from_slice(&expire_secs.to_be_bytes())],
        );
        let resp = roundtrip(&pool, &frame).await?;
        out.push(status_ok(&resp));
    }
    Ok(out)
}

/// Fetches every key in `keys`, grouped one connection per owning node
/// and all owners driven concurrently, under a single 1-second deadline
/// for the whole call.
pub async fn get_multi(client: &Client, keys: Vec<Vec<u8>>) -> Result<Vec<Outcome<Vec<u8>>>> {
    let n = keys.len();
    let groups = group_by_owner(client, &keys)?;

    let mut joinset: JoinSet<(Vec<usize>, Result<Vec<Option<Vec<u8>>>>)> = JoinSet::new();
    for (node, indices) in groups.into_values() {
        let pool = client.pool_for(&node);
        let batch_keys: Vec<Vec<u8>> = indices.iter().map(|&i| keys[i].clone()).collect();
        joinset.spawn(async move {
            let result = match tokio::time::timeout(MULTI_TIMEOUT, pipeline_get(pool, batch_keys)).await {
                Ok(r) => r,
                Err(_) => Err(Error::Cancelled("get_multi timed out".into())),
            };
            (indices, result)
        });
    }

    let mut results: Vec<Option<Outcome<Vec<u8>>>> = vec![None; n];
    let mut first_err = None;
    while let Some(joined) = joinset.join_next().await {
        let (indices, result) = joined.map_err(|e| Error::Cancelled(e.to_string()))?;
        match result {
            Ok(values) => {
                for (idx, value) in indices.into_iter().zip(values) {
                    results[idx] = Some(match value {
                        Some(v) => Outcome::Found(v),
                        None => Outcome::NotFound,
                    });
                }
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(results
        .into_iter()
        .map(|r| r.expect("every key index was assigned to exactly one owner group"))
        .collect())
}

/// Sets every `(key, value, expire_secs)` triple in `items`, grouped and
/// driven the same way as [`get_multi`]. Returns, per item, whether the
/// peer accepted the write.
pub async fn set_multi(client: &Client, items: Vec<(Vec<u8>, Vec<u8>, u32)>) -> Result<Vec<bool>> {
    let n = items.len();
    let keys: Vec<Vec<u8>> = items.iter().map(|(k, _, _)| k.clone()).collect();
    let groups = group_by_owner(client, &keys)?;

    let mut joinset: JoinSet<(Vec<usize>, Result<Vec<bool>>)> = JoinSet::new();
    for (node, indices) in groups.into_values() {
        let pool = client.pool_for(&node);
        let batch_items: Vec<(Vec<u8>, Vec<u8>, u32)> = indices.iter().map(|&i| items[i].clone()).collect();
        joinset.spawn(async move {
            let result = match tokio::time::timeout(MULTI_TIMEOUT, pipeline_set(pool, batch_items)).await {
                Ok(r) => r,
                Err(_) => Err(Error::Cancelled("set_multi timed out".into())),
            };
            (indices, result)
        });
    }

    let mut results: Vec<Option<bool>> = vec![None; n];
    let mut first_err = None;
    while let Some(joined) = joinset.join_next().await {
        let (indices, result) = joined.map_err(|e| Error::Cancelled(e.to_string()))?;
        match result {
            Ok(values) => {
                for (idx, value) in indices.into_iter().zip(values) {
                    results[idx] = Some(value);
                }
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(results
        .into_iter()
        .map(|r| r.expect("every item index was assigned to exactly one owner group"))
        .collect())
}
