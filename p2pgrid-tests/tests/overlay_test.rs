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

use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::PeerAddr;
use p2pgrid_server::p2p::P2pState;
use p2pgrid_tests::{wait_until, Testing};
use std::time::Duration;

#[test]
fn first_contact_registers_both_sides() {
    let testing = Testing::new(Testing::gossip_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("peer-a", 0).unwrap();
        let b = testing.start_peer("peer-b", 0).unwrap();
        let c = testing.start_peer("peer-c", 0).unwrap();

        let report = testing.connect(&b, &["peer-a", "peer-b"]).await;
        assert_eq!(report.contacted, vec![PeerAddr::from("peer-a")]);
        assert!(report.unreachable.is_empty());
        assert!(a.service.contains(b.service.addr()));
        assert!(b.service.contains(a.service.addr()));

        let report = testing
            .connect(&c, &["peer-a", "peer-b", "peer-ghost"])
            .await;
        assert!(report.contacted.contains(&PeerAddr::from("peer-a")));
        assert_eq!(report.unreachable, vec![PeerAddr::from("peer-ghost")]);
        assert!(c.service.contains(a.service.addr()));
        assert!(c.service.contains(b.service.addr()));

        let list = a.service.acquaintance_list();
        assert!(list.contains(b.service.addr()));
        assert!(list.contains(c.service.addr()));
        assert!(!c.service.contains(c.service.addr()));
    });
}

#[test]
fn exploring_grows_overlay() {
    let conf = P2pConf {
        noa: 3,
        ..Testing::gossip_conf()
    };
    let testing = Testing::new(conf);
    Testing::rt().block_on(async move {
        let a = testing.start_peer("explore-a", 0).unwrap();
        let b = testing.start_peer("explore-b", 0).unwrap();
        let c = testing.start_peer("explore-c", 0).unwrap();
        let d = testing.start_peer("explore-d", 0).unwrap();
        testing.chain(&[&a, &b, &c, &d]).await;

        // a only knows b at first, exploring reaches c or d through it.
        let grown = wait_until(Duration::from_secs(5), || {
            c.service.contains(a.service.addr()) || d.service.contains(a.service.addr())
        })
        .await;
        assert!(grown, "acquaintances of a: {:?}", a.service.acquaintance_list());
        assert!(a.service.snapshot().gossip_rounds > 0);
    });
}

#[test]
fn overloaded_peer_trims_acquaintances() {
    let conf = P2pConf {
        noa: 2,
        exploring_msg_percent: 0,
        ..Testing::gossip_conf()
    };
    let testing = Testing::new(conf);
    Testing::rt().block_on(async move {
        let hub = testing.start_peer("hub", 0).unwrap();
        let mut leaves = vec![];
        for i in 0..4 {
            let leaf = testing.start_peer(&format!("leaf-{}", i), 0).unwrap();
            testing.connect(&leaf, &["hub"]).await;
            leaves.push(leaf);
        }

        let trimmed = wait_until(Duration::from_secs(5), || hub.service.size() <= 2).await;
        assert!(trimmed, "hub keeps {:?}", hub.service.acquaintance_list());
    });
}

#[test]
fn stopped_peer_is_pruned() {
    let testing = Testing::new(Testing::gossip_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("stop-a", 0).unwrap();
        let b = testing.start_peer("stop-b", 0).unwrap();
        let c = testing.start_peer("stop-c", 1).unwrap();
        testing.chain(&[&a, &b, &c]).await;
        testing.connect(&c, &["stop-a"]).await;
        assert!(a.service.contains(c.service.addr()));

        c.service.stop();
        c.service.stop();
        assert_eq!(c.service.state(), P2pState::Stopped);
        assert!(testing.network().resolve(c.service.addr()).is_none());

        let pruned = wait_until(Duration::from_secs(5), || {
            !a.service.contains(c.service.addr()) && !b.service.contains(c.service.addr())
        })
        .await;
        assert!(pruned);

        let res = c.service.get_nodes(1, None, "vn", "job");
        assert!(matches!(res, Err(GridError::Closed(_))));
    });
}

#[test]
fn random_walk_finds_a_node() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("walk-a", 0).unwrap();
        let b = testing.start_peer("walk-b", 0).unwrap();
        let c = testing.start_peer("walk-c", 1).unwrap();
        testing.chain(&[&a, &b, &c]).await;

        let mut found = None;
        for _ in 0..20 {
            found = a.service.get_a_node("vn-walk", "job-1").await.unwrap();
            if found.is_some() {
                break;
            }
        }
        let node = found.unwrap();
        assert_eq!(node.url(), "node://walk-c/0");

        let tags = c.manager.tags(node.url()).unwrap();
        assert_eq!(tags.vn_names, vec!["vn-walk".to_string()]);
        assert_eq!(tags.job_id.as_deref(), Some("job-1"));

        assert!(a.service.get_a_node("vn-walk", "job-1").await.unwrap().is_none());
    });
}

// Hub with three leaves holding one node each; returns the nodes found by
// successive walks started at the hub.
async fn star_walks() -> Vec<Option<String>> {
    let testing = Testing::new(Testing::static_conf());
    let hub = testing.start_peer("star-hub", 0).unwrap();
    let leaves: Vec<_> = ["star-l1", "star-l2", "star-l3"]
        .iter()
        .map(|name| testing.start_peer(name, 1).unwrap())
        .collect();
    for leaf in &leaves {
        testing.connect(leaf, &[hub.addr()]).await;
    }
    assert_eq!(hub.service.size(), 3);

    let mut found = vec![];
    for _ in 0..3 {
        let node = hub.service.get_a_node("vn", "job").await.unwrap();
        found.push(node.map(|n| n.url().to_string()));
    }
    found
}

#[test]
fn seeded_random_walk_repeats() {
    Testing::rt().block_on(async move {
        let first = star_walks().await;
        let second = star_walks().await;
        assert!(first[0].is_some());
        assert_eq!(first, second);
    });
}

#[test]
fn snapshot_reports_peer() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let a = testing.start_peer("snap-a", 0).unwrap();
        let b = testing.start_peer("snap-b", 0).unwrap();
        testing.chain(&[&a, &b]).await;

        let snapshot = a.service.snapshot();
        assert_eq!(snapshot.addr, PeerAddr::from("snap-a"));
        assert_eq!(snapshot.acquaintances, vec![PeerAddr::from("snap-b")]);

        let remote = b
            .service
            .peer_ref()
            .snapshot()
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(remote.acquaintances, vec![PeerAddr::from("snap-a")]);
    });
}
