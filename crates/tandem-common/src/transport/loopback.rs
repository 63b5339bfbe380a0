//! In-process connector for replicas living in the same process.
//!
//! Behaves like a relay server: it assigns participant ids, keeps the update
//! history so late joiners catch up, fans updates out to every other member,
//! and reports departures.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smol_str::{SmolStr, format_smolstr};
use tokio::sync::mpsc;

use super::{ClientInfo, Link, TransportError, TransportSignal, VoiceSignal};

struct Member {
    nickname: SmolStr,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    members: BTreeMap<SmolStr, Member>,
    history: Vec<Vec<u8>>,
}

impl HubState {
    fn peer_ids(&self) -> Vec<SmolStr> {
        self.members.keys().cloned().collect()
    }

    fn broadcast(&self, except: Option<&str>, signal: &TransportSignal) {
        for (id, member) in &self.members {
            if Some(id.as_str()) == except {
                continue;
            }
            if member.tx.send(signal.clone()).is_err() {
                tracing::debug!(participant = %id, "member receiver dropped");
            }
        }
    }
}

/// Relay joining every replica of one room.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the room.
    ///
    /// Returns the outbound link and the signal stream for the new member. The
    /// stream starts with the assigned id, then the existing members, then the
    /// update history.
    pub fn join(&self, nickname: &str) -> (LoopbackLink, mpsc::UnboundedReceiver<TransportSignal>) {
        let mut state = self.lock();
        state.next_id += 1;
        let participant = format_smolstr!("peer-{}", state.next_id);
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = tx.send(TransportSignal::Id(participant.clone()));
        for (id, member) in &state.members {
            let _ = tx.send(TransportSignal::Client(ClientInfo {
                participant: id.clone(),
                nickname: member.nickname.clone(),
            }));
        }
        for update in &state.history {
            let _ = tx.send(TransportSignal::Update(update.clone()));
        }

        state.broadcast(
            None,
            &TransportSignal::Client(ClientInfo {
                participant: participant.clone(),
                nickname: nickname.into(),
            }),
        );
        state.members.insert(
            participant.clone(),
            Member {
                nickname: nickname.into(),
                tx,
            },
        );
        let peers = state.peer_ids();
        state.broadcast(None, &TransportSignal::Peers(peers));

        tracing::debug!(%participant, nickname, "member joined loopback hub");

        (
            LoopbackLink {
                hub: self.clone(),
                participant,
                connected: true,
            },
            rx,
        )
    }

    /// Ids of the current members.
    pub fn members(&self) -> Vec<SmolStr> {
        self.lock().peer_ids()
    }

    fn relay(&self, from: &str, update: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.members.contains_key(from) {
            return Err(TransportError::UnknownParticipant(from.to_string()));
        }
        state.broadcast(Some(from), &TransportSignal::Update(update.clone()));
        state.history.push(update);
        Ok(())
    }

    fn relay_voice(&self, from: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.lock();
        if !state.members.contains_key(from) {
            return Err(TransportError::UnknownParticipant(from.to_string()));
        }
        state.broadcast(
            Some(from),
            &TransportSignal::Voice(VoiceSignal {
                from: from.into(),
                payload,
            }),
        );
        Ok(())
    }

    fn leave(&self, participant: &str) {
        let mut state = self.lock();
        if state.members.remove(participant).is_none() {
            return;
        }
        state.broadcast(None, &TransportSignal::LostPeer(participant.into()));
        let peers = state.peer_ids();
        state.broadcast(None, &TransportSignal::Peers(peers));
        tracing::debug!(participant, "member left loopback hub");
    }
}

/// One member's outbound connection to a [`LoopbackHub`].
///
/// Dropping the link leaves the room.
pub struct LoopbackLink {
    hub: LoopbackHub,
    participant: SmolStr,
    connected: bool,
}

impl LoopbackLink {
    /// Participant id the hub assigned to this member.
    pub fn participant(&self) -> &SmolStr {
        &self.participant
    }

    /// Send a voice-channel payload to every other member.
    pub fn send_voice(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.hub.relay_voice(&self.participant, payload)
    }
}

impl Link for LoopbackLink {
    fn send_update(&mut self, update: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        self.hub.relay(&self.participant, update)
    }

    fn disconnect(&mut self) {
        if std::mem::take(&mut self.connected) {
            self.hub.leave(&self.participant);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportSignal>) -> Vec<TransportSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    #[test]
    fn test_join_assigns_id_first() {
        let hub = LoopbackHub::new();
        let (link, mut rx) = hub.join("alice");

        let signals = drain(&mut rx);
        assert_eq!(signals[0], TransportSignal::Id(link.participant().clone()));
        assert_eq!(
            signals.last(),
            Some(&TransportSignal::Peers(vec![link.participant().clone()]))
        );
    }

    #[test]
    fn test_late_joiner_receives_history() {
        let hub = LoopbackHub::new();
        let (mut alice, _alice_rx) = hub.join("alice");
        alice.send_update(vec![1, 2, 3]).unwrap();
        alice.send_update(vec![4]).unwrap();

        let (_bob, mut bob_rx) = hub.join("bob");
        let updates: Vec<_> = drain(&mut bob_rx)
            .into_iter()
            .filter_map(|s| match s {
                TransportSignal::Update(data) => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn test_updates_skip_sender() {
        let hub = LoopbackHub::new();
        let (mut alice, mut alice_rx) = hub.join("alice");
        let (_bob, mut bob_rx) = hub.join("bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.send_update(vec![9]).unwrap();
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![TransportSignal::Update(vec![9])]);
    }

    #[test]
    fn test_disconnect_reports_lost_peer() {
        let hub = LoopbackHub::new();
        let (_alice, mut alice_rx) = hub.join("alice");
        let (mut bob, _bob_rx) = hub.join("bob");
        let bob_id = bob.participant().clone();
        drain(&mut alice_rx);

        bob.disconnect();
        assert!(!bob.is_connected());
        assert!(matches!(bob.send_update(vec![1]), Err(TransportError::Closed)));

        let signals = drain(&mut alice_rx);
        assert_eq!(signals[0], TransportSignal::LostPeer(bob_id));
        assert_eq!(hub.members().len(), 1);
    }

    #[test]
    fn test_drop_leaves_room() {
        let hub = LoopbackHub::new();
        let (_alice, _rx) = hub.join("alice");
        {
            let (_bob, _bob_rx) = hub.join("bob");
            assert_eq!(hub.members().len(), 2);
        }
        assert_eq!(hub.members().len(), 1);
    }

    #[test]
    fn test_voice_relay() {
        let hub = LoopbackHub::new();
        let (mut alice, _alice_rx) = hub.join("alice");
        let (_bob, mut bob_rx) = hub.join("bob");
        drain(&mut bob_rx);

        alice.send_voice(b"offer".to_vec()).unwrap();
        assert_eq!(
            drain(&mut bob_rx),
            vec![TransportSignal::Voice(VoiceSignal {
                from: alice.participant().clone(),
                payload: b"offer".to_vec(),
            })]
        );
    }
}
