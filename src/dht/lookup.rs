use std::collections::HashSet;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, trace};

use super::address_book::AddressBook;
use super::error::DhtError;
use super::node::{NodeId, PeerInfo};
use crate::constants::{ALPHA, K, MAX_QUERIED};

/// Iterative node lookup.
///
/// Starting from the closest peers in `book`, keeps up to [`ALPHA`]
/// `query` calls in flight against the closest candidates not yet asked.
/// Every peer learned along the way goes into `book`. Returns as soon as
/// some answer names `target`; requests still in flight at that point are
/// dropped and their replies go unmatched.
///
/// No new requests are issued once more than [`MAX_QUERIED`] peers have
/// been asked, so the lookup always ends.
pub(crate) async fn find_peer<F, Fut>(
    book: &AddressBook,
    target: NodeId,
    query: F,
) -> Option<PeerInfo>
where
    F: Fn(PeerInfo) -> Fut,
    Fut: Future<Output = Result<Vec<PeerInfo>, DhtError>>,
{
    let mut queried: HashSet<NodeId> = HashSet::new();
    queried.insert(*book.our_id());

    let mut candidates = book.closest(&target, K);
    let mut in_flight = FuturesUnordered::new();

    debug!(
        "lookup {} starting with {} candidates",
        target.short(),
        candidates.len()
    );

    loop {
        while in_flight.len() < ALPHA && queried.len() <= MAX_QUERIED {
            let Some(pos) = candidates.iter().position(|p| !queried.contains(&p.id)) else {
                break;
            };
            let peer = candidates.remove(pos);
            queried.insert(peer.id);

            trace!("lookup {} querying {}", target.short(), peer);
            let id = peer.id;
            let request = query(peer);
            in_flight.push(async move { (id, request.await) });
        }

        let Some((from, result)) = in_flight.next().await else {
            debug!(
                "lookup {} exhausted after querying {} peers",
                target.short(),
                queried.len() - 1
            );
            return None;
        };

        let peers = match result {
            Ok(peers) => peers,
            Err(e) => {
                trace!("lookup {} dropping {}: {}", target.short(), from.short(), e);
                continue;
            }
        };

        for peer in peers {
            if peer.id == target {
                book.insert(peer.clone());
                debug!("lookup {} found {} via {}", target.short(), peer, from.short());
                return Some(peer);
            }
            if queried.contains(&peer.id) {
                continue;
            }
            book.insert(peer.clone());
            if !candidates.iter().any(|c| c.id == peer.id) {
                candidates.push(peer);
            }
        }

        candidates.sort_by_key(|p| p.id.distance(&target));
        candidates.truncate(K);
    }
}
