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

use orpc::rpc::Mailbox;
use p2pgrid_common::state::{MessageId, NodeCount, PeerAddr};
use p2pgrid_server::p2p::{AskingNodeMsg, LookupMessage, LookupRef, NodeAck, PeerMessage, PeerRef};
use p2pgrid_tests::{booked, wait_until, TestPeer, Testing};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

// A consumer that accepts every offer and records where it came from.
struct Collector {
    lookup: LookupRef,
    origin: PeerRef,
    offers: Arc<Mutex<Vec<String>>>,
    _origin_mailbox: Mailbox<PeerMessage>,
    _task: JoinHandle<()>,
}

impl Collector {
    fn open(name: &str) -> Collector {
        let (lookup, mut mailbox) = LookupRef::open(
            name.to_string(),
            NodeCount::Exact(100),
            "vn",
            "job",
            None,
            PeerAddr::from(name),
            256,
        );
        let (endpoint, origin_mailbox) = Mailbox::channel(name, 16);
        let origin = PeerRef::new(PeerAddr::from(name), endpoint);

        let offers = Arc::new(Mutex::new(vec![]));
        let seen = offers.clone();
        let task = Testing::rt().spawn(async move {
            while let Some(msg) = mailbox.recv().await {
                if let LookupMessage::GiveNode { manager, reply, .. } = msg {
                    seen.lock().unwrap().push(manager.id().to_string());
                    reply.send(NodeAck::Ack);
                }
            }
        });

        Collector {
            lookup,
            origin,
            offers,
            _origin_mailbox: origin_mailbox,
            _task: task,
        }
    }

    fn flood(&self, entry: &TestPeer, ttl: u32) {
        let msg = AskingNodeMsg {
            ttl,
            id: Some(MessageId::random()),
            origin: self.origin.clone(),
            count: NodeCount::Exact(100),
            lookup: self.lookup.clone(),
            vn_name: "vn".to_string(),
            job_id: "job".to_string(),
            filter: None,
        };
        entry.service.peer_ref().asking_node(msg).unwrap();
    }

    fn offers(&self) -> Vec<String> {
        let mut list = self.offers.lock().unwrap().clone();
        list.sort();
        list
    }
}

#[test]
fn full_mesh_serves_each_message_once() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let peers: Vec<TestPeer> = ["mesh-a", "mesh-b", "mesh-c", "mesh-d"]
            .iter()
            .map(|name| testing.start_peer(name, 5).unwrap())
            .collect();
        for i in 1..peers.len() {
            let seeds: Vec<&str> = peers[..i].iter().map(|p| p.addr()).collect();
            testing.connect(&peers[i], &seeds).await;
        }
        let meshed = wait_until(Duration::from_secs(3), || {
            peers.iter().all(|p| p.service.size() == 3)
        })
        .await;
        assert!(meshed);

        let collector = Collector::open("mesh-consumer");
        collector.flood(&peers[0], 5);

        let all = wait_until(Duration::from_secs(5), || collector.offers().len() == 4).await;
        assert!(all);
        // Late duplicates must not produce more offers.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            collector.offers(),
            vec!["mesh-a", "mesh-b", "mesh-c", "mesh-d"]
        );
        for peer in &peers {
            assert_eq!(peer.manager.booked_count(), 1);
        }

        let duplicates: u64 = peers.iter().map(|p| p.service.snapshot().duplicates).sum();
        assert!(duplicates > 0);
    });
}

#[test]
fn forwarding_stops_when_hops_run_out() {
    let testing = Testing::new(Testing::static_conf());
    Testing::rt().block_on(async move {
        let peers: Vec<TestPeer> = ["hops-a", "hops-b", "hops-c", "hops-d"]
            .iter()
            .map(|name| testing.start_peer(name, 5).unwrap())
            .collect();
        let chain: Vec<&TestPeer> = peers.iter().collect();
        testing.chain(&chain).await;

        // The entry peer counts one hop: a serves and forwards, b serves only.
        let collector = Collector::open("hops-consumer");
        collector.flood(&peers[0], 2);

        let served = wait_until(Duration::from_secs(3), || collector.offers().len() == 2).await;
        assert!(served);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(collector.offers(), vec!["hops-a", "hops-b"]);
        assert_eq!(booked(&[&peers[2], &peers[3]]), 0);

        // A single hop never leaves the entry peer.
        let collector = Collector::open("hops-consumer-2");
        collector.flood(&peers[3], 1);
        let served = wait_until(Duration::from_secs(3), || collector.offers().len() == 1).await;
        assert!(served);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(collector.offers(), vec!["hops-d"]);
        assert_eq!(booked(&[&peers[2]]), 0);
    });
}
