//! Matching adapter.
//!
//! Keeps the most recent new matches, mutual matches and incoming reveal
//! requests (newest first, bounded), the outcome of each reveal, and the
//! latest trust-score and behavioural-profile updates.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_client::{SendOptions, SessionError, SessionHandle, Subscription};
use tether_core::{Envelope, EnvelopeId, MatchId, MessageType, Payload, UserId};
use tracing::{debug, warn};

/// One match-related event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    /// The match.
    pub match_id: MatchId,
    /// The other user, when named.
    pub user_id: Option<UserId>,
    /// Full payload as received.
    pub payload: Payload,
    /// Envelope timestamp.
    pub received_at: DateTime<Utc>,
}

impl MatchEvent {
    fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let Some(match_id) = envelope.payload_str("matchId") else {
            warn!(message_type = %envelope.message_type, "match event without matchId");
            return None;
        };
        Some(Self {
            match_id: MatchId::from(match_id),
            user_id: envelope.payload_str("userId").map(UserId::from),
            payload: envelope.payload.clone(),
            received_at: envelope.timestamp,
        })
    }
}

/// How a reveal request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealOutcome {
    /// The other side accepted.
    Accepted,
    /// The other side declined.
    Declined,
    /// Both sides revealed.
    Mutual,
}

#[derive(Debug)]
struct MatchingState {
    limit: usize,
    new_matches: VecDeque<MatchEvent>,
    mutual_matches: VecDeque<MatchEvent>,
    reveal_requests: VecDeque<MatchEvent>,
    reveal_outcomes: HashMap<MatchId, RevealOutcome>,
    trust_score: Option<Payload>,
    behavior_profile: Option<Payload>,
}

impl MatchingState {
    fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            new_matches: VecDeque::new(),
            mutual_matches: VecDeque::new(),
            reveal_requests: VecDeque::new(),
            reveal_outcomes: HashMap::new(),
            trust_score: None,
            behavior_profile: None,
        }
    }
}

fn push_recent(list: &mut VecDeque<MatchEvent>, event: MatchEvent, limit: usize) {
    list.push_front(event);
    list.truncate(limit);
}

/// Matching state derived from the session.
#[derive(Debug)]
pub struct MatchingAdapter {
    session: SessionHandle,
    state: Arc<Mutex<MatchingState>>,
    _subscriptions: Vec<Subscription>,
}

impl MatchingAdapter {
    /// Subscribe to matching traffic on `session`.
    pub fn new(session: &SessionHandle) -> Self {
        let limit = session.settings().features.match_history_limit;
        let state = Arc::new(Mutex::new(MatchingState::new(limit)));
        let mut subscriptions = Vec::with_capacity(8);

        let on = |message_type: MessageType, apply: fn(&mut MatchingState, &Envelope)| {
            let state = Arc::clone(&state);
            session.subscribe(message_type, move |env| apply(&mut state.lock(), env))
        };

        subscriptions.push(on(MessageType::NewMatch, |s, env| {
            if let Some(event) = MatchEvent::from_envelope(env) {
                debug!(match_id = %event.match_id, "new match");
                let limit = s.limit;
                push_recent(&mut s.new_matches, event, limit);
            }
        }));
        subscriptions.push(on(MessageType::MatchMutual, |s, env| {
            if let Some(event) = MatchEvent::from_envelope(env) {
                debug!(match_id = %event.match_id, "mutual match");
                let limit = s.limit;
                push_recent(&mut s.mutual_matches, event, limit);
            }
        }));
        subscriptions.push(on(MessageType::RevealRequest, |s, env| {
            if let Some(event) = MatchEvent::from_envelope(env) {
                debug!(match_id = %event.match_id, "reveal requested");
                let limit = s.limit;
                push_recent(&mut s.reveal_requests, event, limit);
            }
        }));
        for (message_type, outcome) in [
            (MessageType::RevealAccepted, RevealOutcome::Accepted),
            (MessageType::RevealDeclined, RevealOutcome::Declined),
            (MessageType::RevealMutual, RevealOutcome::Mutual),
        ] {
            let state = Arc::clone(&state);
            subscriptions.push(session.subscribe(message_type, move |env| {
                if let Some(event) = MatchEvent::from_envelope(env) {
                    debug!(match_id = %event.match_id, ?outcome, "reveal outcome");
                    let _ = state.lock().reveal_outcomes.insert(event.match_id, outcome);
                }
            }));
        }
        subscriptions.push(on(MessageType::TrustScoreUpdate, |s, env| {
            s.trust_score = Some(env.payload.clone());
        }));
        subscriptions.push(on(MessageType::BgpUpdate, |s, env| {
            s.behavior_profile = Some(env.payload.clone());
        }));

        Self {
            session: session.clone(),
            state,
            _subscriptions: subscriptions,
        }
    }

    /// Like a match.
    pub fn send_like(&self, match_id: &MatchId) -> Result<EnvelopeId, SessionError> {
        self.send(MessageType::MatchLiked, match_id)
    }

    /// Pass on a match.
    pub fn send_pass(&self, match_id: &MatchId) -> Result<EnvelopeId, SessionError> {
        self.send(MessageType::MatchPassed, match_id)
    }

    /// Ask the other side of a match to reveal.
    pub fn send_reveal_request(&self, match_id: &MatchId) -> Result<EnvelopeId, SessionError> {
        self.send(MessageType::RevealRequest, match_id)
    }

    /// Answer an incoming reveal request and drop it from the pending list.
    pub fn respond_to_reveal(
        &self,
        match_id: &MatchId,
        accept: bool,
    ) -> Result<EnvelopeId, SessionError> {
        let message_type = if accept {
            MessageType::RevealAccepted
        } else {
            MessageType::RevealDeclined
        };
        let id = self.send(message_type, match_id)?;
        self.state
            .lock()
            .reveal_requests
            .retain(|r| &r.match_id != match_id);
        Ok(id)
    }

    /// Recent new matches, newest first.
    pub fn new_matches(&self) -> Vec<MatchEvent> {
        self.state.lock().new_matches.iter().cloned().collect()
    }

    /// Recent mutual matches, newest first.
    pub fn mutual_matches(&self) -> Vec<MatchEvent> {
        self.state.lock().mutual_matches.iter().cloned().collect()
    }

    /// Unanswered reveal requests, newest first.
    pub fn reveal_requests(&self) -> Vec<MatchEvent> {
        self.state.lock().reveal_requests.iter().cloned().collect()
    }

    /// Outcome of a reveal, if known.
    pub fn reveal_outcome(&self, match_id: &MatchId) -> Option<RevealOutcome> {
        self.state.lock().reveal_outcomes.get(match_id).copied()
    }

    /// Latest `TRUST_SCORE_UPDATE` payload.
    pub fn trust_score(&self) -> Option<Payload> {
        self.state.lock().trust_score.clone()
    }

    /// Latest `BGP_UPDATE` payload.
    pub fn behavior_profile(&self) -> Option<Payload> {
        self.state.lock().behavior_profile.clone()
    }

    fn send(&self, message_type: MessageType, match_id: &MatchId) -> Result<EnvelopeId, SessionError> {
        let receipt = self.session.send(
            message_type,
            json!({ "matchId": match_id }),
            SendOptions::fire_and_forget(),
        )?;
        Ok(receipt.id)
    }
}
