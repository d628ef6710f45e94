// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use orpc::rpc::{Mailbox, ReplySender};
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::{MessageId, NodeCount, NodeHandle, PeerAddr};
use p2pgrid_server::p2p::{
    AskingNodeMsg, LocalNodeManager, LookupMessage, LookupRef, LookupState, NodeAck, PeerRef,
};
use p2pgrid_tests::{booked, wait_until, TestPeer, Testing};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct Ring {
    a: TestPeer,
    b: TestPeer,
    c: TestPeer,
    d: TestPeer,
    e: TestPeer,
}

impl Ring {
    // a - b - c - d - e, with two free nodes on d and one on e.
    async fn start(testing: &Testing, prefix: &str) -> Ring {
        let peer = |name: &str, n: usize| {
            testing
                .start_peer(&format!("{}-{}", prefix, name), n)
                .unwrap()
        };
        let ring = Ring {
            a: peer("a", 0),
            b: peer("b", 0),
            c: peer("c", 0),
            d: peer("d", 2),
            e: peer("e", 1),
        };
        testing
            .chain(&[&ring.a, &ring.b, &ring.c, &ring.d, &ring.e])
            .await;
        ring
    }

    fn providers(&self) -> [&TestPeer; 2] {
        [&self.d, &self.e]
    }
}

#[test]
fn lookup_collects_nodes_across_overlay() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let ring = Ring::start(&testing, "collect").await;

        let lookup = ring.a.service.get_nodes(3, None, "vn-1", "job-1").unwrap();
        let state = lookup.wait_finished_timeout(Duration::from_secs(10)).await;
        assert_eq!(state, Some(LookupState::Satisfied));
        assert!(lookup.all_arrived());

        let nodes = lookup.claimed_nodes();
        let urls: HashSet<_> = nodes.iter().map(|n| n.url().to_string()).collect();
        assert_eq!(urls.len(), 3);
        assert_eq!(ring.d.manager.booked_count(), 2);
        assert_eq!(ring.e.manager.booked_count(), 1);

        for node in &nodes {
            let provider = ring
                .providers()
                .into_iter()
                .find(|p| p.manager.is_booked(node.url()))
                .unwrap();
            let tags = provider.manager.tags(node.url()).unwrap();
            assert_eq!(tags.vn_names, vec!["vn-1".to_string()]);
            assert_eq!(tags.job_id.as_deref(), Some("job-1"));
            assert_eq!(provider.manager.acquaintances(), vec!["collect-a".to_string()]);
        }
        assert_eq!(
            ring.a.manager.acquaintances(),
            vec!["collect-d".to_string(), "collect-e".to_string()]
        );

        let duplicates: u64 = [&ring.a, &ring.b, &ring.c, &ring.d, &ring.e]
            .iter()
            .map(|p| p.service.snapshot().duplicates)
            .sum();
        assert!(duplicates > 0);
    });
}

#[test]
fn lookup_never_exceeds_request() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let ring = Ring::start(&testing, "bounded").await;

        let lookup = ring.a.service.get_nodes(2, None, "vn", "job").unwrap();
        let state = lookup.wait_finished_timeout(Duration::from_secs(10)).await;
        assert_eq!(state, Some(LookupState::Satisfied));
        assert_eq!(lookup.acquired(), 2);

        // Offers that lost the race are refused and released.
        let settled =
            wait_until(Duration::from_secs(3), || booked(&ring.providers()) == 2).await;
        assert!(settled);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(booked(&ring.providers()), 2);
        assert_eq!(lookup.claimed_nodes().len(), 2);

        assert_eq!(lookup.kill_all_nodes(), 2);
        assert_eq!(booked(&ring.providers()), 0);
        assert_eq!(ring.d.manager.free_count() + ring.e.manager.free_count(), 3);
    });
}

#[test]
fn lookup_applies_family_filter() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("filter-a", 0).unwrap();
        let manager = LocalNodeManager::with_nodes(
            "filter-b",
            vec![
                NodeHandle::new("node://filter-b/cpu", "cpu"),
                NodeHandle::new("node://filter-b/gpu", "gpu-a100"),
            ],
        );
        let b = testing.start_peer_with("filter-b", Arc::new(manager)).unwrap();
        testing.chain(&[&a, &b]).await;

        let lookup = a.service.get_nodes(1, Some("gpu-.*"), "vn", "job").unwrap();
        let state = lookup.wait_finished_timeout(Duration::from_secs(10)).await;
        assert_eq!(state, Some(LookupState::Satisfied));
        let nodes = lookup.claimed_nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].family(), "gpu-a100");
        assert!(!b.manager.is_booked("node://filter-b/cpu"));
    });
}

#[test]
fn lookup_times_out_with_partial_result() {
    let conf = P2pConf {
        rpc_timeout_str: "1s".to_string(),
        ..Default::default()
    }
    .with_durations("60s", "500ms", "1s", "200ms")
    .unwrap();
    let testing = Testing::new(conf);
    Testing::rt().block_on(async move {
        let ring = Ring::start(&testing, "partial").await;

        let lookup = ring.a.service.get_nodes(5, None, "vn", "job").unwrap();
        let state = lookup.wait_finished_timeout(Duration::from_secs(10)).await;
        assert_eq!(state, Some(LookupState::TimedOut));
        assert_eq!(lookup.acquired(), 3);
        assert!(!lookup.all_arrived());
        assert!(lookup.n_arrived(3));

        assert_eq!(lookup.claimed_nodes().len(), 3);
        assert_eq!(lookup.kill_all_nodes(), 3);
        assert_eq!(booked(&ring.providers()), 0);
    });
}

#[test]
fn max_lookup_runs_until_cancelled() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let ring = Ring::start(&testing, "max").await;

        let lookup = ring.a.service.get_maximum_nodes("vn", "job").unwrap();
        assert_eq!(lookup.target(), NodeCount::Max);
        let all = wait_until(Duration::from_secs(5), || lookup.acquired() == 3).await;
        assert!(all);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(lookup.status(), LookupState::Collecting);
        assert_eq!(ring.a.service.snapshot().waiting_lookups, 1);

        lookup.cancel();
        assert_eq!(lookup.wait_finished().await, LookupState::Cancelled);
        assert!(lookup.claimed_nodes().is_empty());
        let released = wait_until(Duration::from_secs(3), || booked(&ring.providers()) == 0).await;
        assert!(released);
    });
}

#[test]
fn kill_node_gives_it_back() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let ring = Ring::start(&testing, "kill").await;

        let lookup = ring.a.service.get_nodes(1, None, "vn", "job").unwrap();
        lookup.wait_finished().await;
        let node = lookup.claimed_nodes().pop().unwrap();

        assert!(lookup.kill_node(node.url()));
        assert!(!lookup.kill_node(node.url()));
        assert_eq!(booked(&ring.providers()), 0);
    });
}

#[test]
fn invalid_requests_fail_fast() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("invalid-a", 1).unwrap();

        let res = a.service.get_nodes(0, None, "vn", "job");
        assert!(matches!(res, Err(GridError::InvalidArgument(_))));

        let res = a.service.get_nodes(1, Some("gpu-("), "vn", "job");
        assert!(matches!(res, Err(GridError::InvalidArgument(_))));
    });
}

fn asking(lookup: &LookupRef, origin: &PeerRef) -> AskingNodeMsg {
    AskingNodeMsg {
        ttl: 3,
        id: Some(MessageId::random()),
        origin: origin.clone(),
        count: NodeCount::Exact(1),
        lookup: lookup.clone(),
        vn_name: "vn".to_string(),
        job_id: "job".to_string(),
        filter: None,
    }
}

async fn next_offer(offers: &mut Mailbox<LookupMessage>) -> (NodeHandle, ReplySender<NodeAck>) {
    let offer = tokio::time::timeout(Duration::from_secs(2), offers.recv())
        .await
        .unwrap()
        .unwrap();
    match offer {
        LookupMessage::GiveNode { node, reply, .. } => (node, reply),
        _ => panic!("expected a node offer"),
    }
}

#[test]
fn unacknowledged_offer_is_released() {
    let conf = P2pConf {
        rpc_timeout_str: "1s".to_string(),
        ..Default::default()
    }
    .with_durations("60s", "300ms", "10s", "200ms")
    .unwrap();
    let testing = Testing::new(conf);
    Testing::rt().block_on(async move {
        let provider = testing.start_peer("ack-provider", 1).unwrap();

        // A consumer that reads offers and answers them by hand.
        let (lookup, mut offers) = LookupRef::open(
            "silent".to_string(),
            NodeCount::Exact(1),
            "vn",
            "job",
            None,
            PeerAddr::from("ack-consumer"),
            16,
        );
        let (endpoint, _consumer_mailbox) = Mailbox::channel("ack-consumer", 16);
        let origin = PeerRef::new(PeerAddr::from("ack-consumer"), endpoint);

        provider
            .service
            .peer_ref()
            .asking_node(asking(&lookup, &origin))
            .unwrap();
        let (node, reply) = next_offer(&mut offers).await;
        assert_eq!(node.url(), "node://ack-provider/0");
        assert_eq!(provider.manager.booked_count(), 1);

        // Tagged before the consumer answered.
        let tags = provider.manager.tags(node.url()).unwrap();
        assert_eq!(tags.vn_names, vec!["vn".to_string()]);
        assert_eq!(tags.job_id.as_deref(), Some("job"));

        let released = wait_until(Duration::from_secs(3), || {
            provider.manager.free_count() == 1
        })
        .await;
        assert!(released);
        assert!(provider.manager.tags(node.url()).is_none());

        // Too late, the provider stopped waiting.
        assert!(!reply.send(NodeAck::Ack));
        assert_eq!(provider.manager.booked_count(), 0);

        // The released node is offered again to the next request.
        provider
            .service
            .peer_ref()
            .asking_node(asking(&lookup, &origin))
            .unwrap();
        let (again, reply) = next_offer(&mut offers).await;
        assert_eq!(again, node);
        assert!(reply.send(NodeAck::Ack));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(provider.manager.booked_count(), 1);
        assert_eq!(provider.manager.free_count(), 0);
    });
}

#[test]
fn unreachable_origin_is_not_served() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let provider = testing.start_peer("gone-provider", 1).unwrap();

        let (lookup, mut offers) = LookupRef::open(
            "orphan".to_string(),
            NodeCount::Exact(1),
            "vn",
            "job",
            None,
            PeerAddr::from("gone-consumer"),
            16,
        );
        let (endpoint, consumer_mailbox) = Mailbox::channel("gone-consumer", 16);
        let origin = PeerRef::new(PeerAddr::from("gone-consumer"), endpoint);
        drop(consumer_mailbox);

        provider
            .service
            .peer_ref()
            .asking_node(asking(&lookup, &origin))
            .unwrap();

        let offer = tokio::time::timeout(Duration::from_millis(500), offers.recv()).await;
        assert!(offer.is_err());
        assert_eq!(provider.manager.booked_count(), 0);
        assert_eq!(provider.manager.free_count(), 1);
    });
}
