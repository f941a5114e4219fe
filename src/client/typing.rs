//! Typing indicator throttle: one "started" probe per burst of keystrokes,
//! one "stopped" probe once the keyboard goes quiet.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::domain::conversation::ConversationId;
use crate::domain::message::TypingSignal;
use crate::router::RouteError;
use crate::transport::Publisher;

const TYPING_STOP_PUBLISH_FAILED: &str = "CHAT_TYPING_STOP_PUBLISH_FAILED";

/// Collapses keystroke-level notifications into burst-level probes. Probes
/// are advisory; the quiet timer keeps running even if a publish fails.
pub struct TypingThrottle {
    publisher: Publisher,
    destination: String,
    quiet_for: Duration,
    active: Option<ActiveBurst>,
}

struct ActiveBurst {
    conversation: ConversationId,
    poke_tx: mpsc::UnboundedSender<()>,
}

impl TypingThrottle {
    pub fn new(publisher: Publisher, destination: String, quiet_for: Duration) -> Self {
        Self {
            publisher,
            destination,
            quiet_for,
            active: None,
        }
    }

    /// Call on every keystroke. The first call of a burst publishes a
    /// "started" probe; subsequent calls only push the quiet deadline out.
    /// Switching conversations ends the previous burst.
    pub async fn notify(&mut self, signal: TypingSignal) -> Result<(), RouteError> {
        if let Some(burst) = &self.active {
            if burst.conversation == signal.conversation_id && burst.poke_tx.send(()).is_ok() {
                return Ok(());
            }
            // Either the burst timer already finished or the conversation
            // changed. Dropping the sender lets the old timer emit its stop.
            self.active = None;
        }

        let started = TypingSignal {
            is_typing: true,
            ..signal.clone()
        };
        let body = serde_json::to_string(&started)?;
        self.publisher.publish(&self.destination, body).await?;

        let stopped = TypingSignal {
            is_typing: false,
            ..signal.clone()
        };
        let (poke_tx, poke_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_quiet_timer(
            self.publisher.clone(),
            self.destination.clone(),
            stopped,
            self.quiet_for,
            poke_rx,
        ));
        self.active = Some(ActiveBurst {
            conversation: signal.conversation_id,
            poke_tx,
        });
        Ok(())
    }

    /// Ends the current burst, if any. The timer emits the stop probe.
    pub fn cancel(&mut self) {
        self.active = None;
    }
}

async fn run_quiet_timer(
    publisher: Publisher,
    destination: String,
    stopped: TypingSignal,
    quiet_for: Duration,
    mut poke_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        match timeout(quiet_for, poke_rx.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    let Ok(body) = serde_json::to_string(&stopped) else {
        return;
    };
    if let Err(error) = publisher.publish(&destination, body).await {
        tracing::debug!(
            code = TYPING_STOP_PUBLISH_FAILED,
            error = %error,
            "stopped-typing probe dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::UserId;
    use crate::test_support::{BrokerSim, PipeDialer};
    use crate::transport::TransportSession;

    const QUIET: Duration = Duration::from_millis(150);

    async fn throttle_over_pipe() -> (TypingThrottle, BrokerSim, TransportSession) {
        let (dialer, mut accepted) = PipeDialer::new();
        let mut session = TransportSession::new(Box::new(dialer), "plantcare");
        let (result, broker) = tokio::join!(session.connect(), async {
            let mut broker = BrokerSim::accept(&mut accepted).await;
            broker.complete_handshake().await;
            broker
        });
        result.expect("connect should succeed");

        let throttle = TypingThrottle::new(
            session.publisher(),
            "/app/chat.typing".to_owned(),
            QUIET,
        );
        (throttle, broker, session)
    }

    fn signal(me: UserId, other: UserId) -> TypingSignal {
        TypingSignal {
            conversation_id: ConversationId::derive(me, other),
            sender_id: me,
            receiver_id: Some(other),
            is_typing: true,
        }
    }

    async fn next_signal(broker: &mut BrokerSim) -> TypingSignal {
        let frame = broker.expect_frame().await;
        assert_eq!(frame.destination(), Some("/app/chat.typing"));
        serde_json::from_str(&frame.body).expect("typing payload decodes")
    }

    async fn assert_quiet(broker: &mut BrokerSim, for_ms: u64) {
        let silent = timeout(Duration::from_millis(for_ms), broker.expect_frame()).await;
        assert!(silent.is_err(), "expected no frame, got {silent:?}");
    }

    #[tokio::test]
    async fn first_keystroke_publishes_a_started_probe() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");

        let probe = next_signal(&mut broker).await;
        assert!(probe.is_typing);
        assert_eq!(probe.conversation_id, ConversationId::derive(5, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_keystrokes_within_the_window_stay_silent() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");
        throttle.notify(signal(5, 9)).await.expect("notify");
        throttle.notify(signal(5, 9)).await.expect("notify");

        assert!(next_signal(&mut broker).await.is_typing);
        assert_quiet(&mut broker, 50).await;
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_keyboard_emits_a_stopped_probe() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");

        assert!(next_signal(&mut broker).await.is_typing);
        let stopped = next_signal(&mut broker).await;
        assert!(!stopped.is_typing);
        assert_eq!(stopped.conversation_id, ConversationId::derive(5, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_extend_the_quiet_deadline() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");
        assert!(next_signal(&mut broker).await.is_typing);

        tokio::time::sleep(Duration::from_millis(75)).await;
        throttle.notify(signal(5, 9)).await.expect("notify");

        // The stop would have fired at 150ms without the second keystroke.
        assert_quiet(&mut broker, 100).await;
        assert!(!next_signal(&mut broker).await.is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_conversations_ends_the_old_burst() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");
        assert!(next_signal(&mut broker).await.is_typing);

        throttle.notify(signal(5, 7)).await.expect("notify");

        let mut seen = vec![
            next_signal(&mut broker).await,
            next_signal(&mut broker).await,
        ];
        seen.sort_by_key(|probe| probe.is_typing);

        assert_eq!(seen[0].conversation_id, ConversationId::derive(5, 9));
        assert!(!seen[0].is_typing);
        assert_eq!(seen[1].conversation_id, ConversationId::derive(5, 7));
        assert!(seen[1].is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_the_burst_immediately() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");
        assert!(next_signal(&mut broker).await.is_typing);

        throttle.cancel();

        assert!(!next_signal(&mut broker).await.is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_burst_can_start_after_the_previous_one_ended() {
        let (mut throttle, mut broker, _session) = throttle_over_pipe().await;

        throttle.notify(signal(5, 9)).await.expect("notify");
        assert!(next_signal(&mut broker).await.is_typing);
        assert!(!next_signal(&mut broker).await.is_typing);

        throttle.notify(signal(5, 9)).await.expect("notify");

        assert!(next_signal(&mut broker).await.is_typing);
    }
}
