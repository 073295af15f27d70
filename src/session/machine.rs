//! Session coordinator implementation
//!
//! Owns the capture and playback adapters and the dispatcher, and moves
//! between Idle, Listening, Dispatching and Speaking as UI commands,
//! adapter events and dispatch outcomes arrive. Everything runs on one
//! task, so session state needs no locking.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dispatch::{AssistantReply, DispatchError, QueryDispatcher, QueryRequest};
use crate::events::{ErrorKind, SessionEvent};
use crate::speech::{
    CaptureError, CaptureEvent, PlaybackEvent, SpeechCapture, SpeechPlayback, StartOutcome,
};

use super::conversation::{Conversation, Turn};

/// Assistant turn recorded when a query fails
const DISPATCH_FAILURE_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// The four possible states of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing captured, nothing playing
    #[default]
    Idle,
    /// Capturing the user's utterance
    Listening,
    /// Waiting for the assistant's reply
    Dispatching,
    /// Playing the reply
    Speaking,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Dispatching => write!(f, "Dispatching"),
            SessionState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Commands from UI hosts
#[derive(Debug)]
pub enum SessionCommand {
    /// Mic pressed: start capture, or stop it if already listening
    StartCapture,
    /// Cancel the current capture without dispatching
    StopCapture,
    /// Typed query
    SubmitQuery(String),
    /// Silence the reply being spoken
    Mute,
    /// Assistant dismissed: stop everything and reset
    Close,
    /// Report the current session
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Whether the mic control should be enabled
    pub capture_supported: bool,
    /// Whether replies are spoken aloud
    pub speech_output: bool,
    /// Latest provisional transcript while listening
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interim_transcript: Option<String>,
    pub turns: Vec<Turn>,
}

/// Query parameters applied to every dispatch
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub result_limit: u32,
    pub timeout: Duration,
}

/// Result of one dispatch, tagged with the epoch it was issued in
struct DispatchOutcome {
    epoch: u64,
    result: Result<AssistantReply, DispatchError>,
}

/// Coordinates capture, dispatch and playback for one voice session
pub struct Coordinator {
    state: SessionState,
    capture: SpeechCapture,
    playback: SpeechPlayback,
    dispatcher: Arc<dyn QueryDispatcher>,
    options: DispatchOptions,
    /// Bumped on every dispatch and on close; outcomes from older epochs are stale
    epoch: u64,
    interim: Option<String>,
    conversation: Conversation,
    event_tx: broadcast::Sender<SessionEvent>,
    outcome_tx: mpsc::UnboundedSender<DispatchOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<DispatchOutcome>,
}

impl Coordinator {
    /// Create a coordinator in the Idle state
    pub fn new(
        capture: SpeechCapture,
        playback: SpeechPlayback,
        dispatcher: Arc<dyn QueryDispatcher>,
        options: DispatchOptions,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::Idle,
            capture,
            playback,
            dispatcher,
            options,
            epoch: 0,
            interim: None,
            conversation: Conversation::default(),
            event_tx,
            outcome_tx,
            outcome_rx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            capture_supported: self.capture.is_supported(),
            speech_output: self.playback.is_available(),
            interim_transcript: self.interim.clone(),
            turns: self.conversation.turns().to_vec(),
        }
    }

    /// Run the coordinator until the command channel closes
    pub async fn run(&mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!("session coordinator started in Idle state");

        while self.tick(&mut commands).await {}

        self.close();
        info!("session coordinator stopped");
    }

    /// Process one command or event; false once commands are exhausted
    async fn tick(&mut self, commands: &mut mpsc::Receiver<SessionCommand>) -> bool {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => self.handle_command(command),
                    None => return false,
                }
            }
            event = self.capture.next_event() => self.handle_capture_event(event),
            event = self.playback.next_event() => self.handle_playback_event(event),
            Some(outcome) = self.outcome_rx.recv() => self.handle_dispatch_outcome(outcome),
        }
        true
    }

    fn handle_command(&mut self, command: SessionCommand) {
        debug!(?command, state = %self.state, "session command");

        match command {
            SessionCommand::StartCapture => match self.state {
                SessionState::Dispatching => {
                    debug!("ignoring capture request while a query is in flight");
                }
                SessionState::Speaking => {
                    self.playback.stop();
                    self.begin_capture();
                }
                SessionState::Idle | SessionState::Listening => self.begin_capture(),
            },
            SessionCommand::StopCapture => {
                if self.state == SessionState::Listening {
                    self.capture.stop();
                    self.interim = None;
                    self.transition_to(SessionState::Idle);
                }
            }
            SessionCommand::SubmitQuery(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                match self.state {
                    SessionState::Dispatching => {
                        debug!("ignoring query while another is in flight");
                        return;
                    }
                    SessionState::Listening => {
                        self.capture.stop();
                        self.interim = None;
                    }
                    SessionState::Speaking => self.playback.stop(),
                    SessionState::Idle => {}
                }
                self.dispatch(text.to_string());
            }
            SessionCommand::Mute => {
                if self.state == SessionState::Speaking {
                    self.playback.stop();
                    self.transition_to(SessionState::Idle);
                }
            }
            SessionCommand::Close => self.close(),
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Start capture, treating a running capture as a toggle
    fn begin_capture(&mut self) {
        match self.capture.start() {
            Ok(StartOutcome::Started) => self.transition_to(SessionState::Listening),
            Ok(StartOutcome::Stopped) => {
                self.interim = None;
                self.transition_to(SessionState::Idle);
            }
            Err(CaptureError::Unsupported) => {
                warn!("speech capture requested but not supported");
                self.notify(ErrorKind::Unsupported);
                self.transition_to(SessionState::Idle);
            }
            Err(CaptureError::Engine(e)) => {
                warn!(?e, "speech capture failed to start");
                self.notify(ErrorKind::Recognition);
                self.transition_to(SessionState::Idle);
            }
        }
    }

    fn handle_capture_event(&mut self, event: CaptureEvent) {
        if self.state != SessionState::Listening {
            debug!(?event, "ignoring capture event outside Listening");
            return;
        }

        match event {
            CaptureEvent::Started => debug!("capture confirmed by engine"),
            CaptureEvent::Interim(text) => {
                self.interim = Some(text.clone());
                self.emit(SessionEvent::InterimTranscript { text });
            }
            CaptureEvent::Final(text) => {
                self.capture.stop();
                self.interim = None;
                self.emit(SessionEvent::FinalTranscript { text: text.clone() });
                self.dispatch(text);
            }
            CaptureEvent::Error(e) => {
                warn!(error = %e, "capture ended with error");
                self.interim = None;
                self.notify(ErrorKind::Recognition);
                self.transition_to(SessionState::Idle);
            }
            CaptureEvent::Stopped => {
                self.interim = None;
                self.transition_to(SessionState::Idle);
            }
        }
    }

    /// Send `text` to the assistant on a separate task
    fn dispatch(&mut self, text: String) {
        self.conversation.push_user(text.clone());
        self.epoch += 1;
        self.transition_to(SessionState::Dispatching);

        let epoch = self.epoch;
        let dispatcher = Arc::clone(&self.dispatcher);
        let outcome_tx = self.outcome_tx.clone();
        let timeout = self.options.timeout;
        let request = QueryRequest {
            query: text,
            limit: self.options.result_limit,
        };

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, dispatcher.query(request)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(timeout)),
            };
            let _ = outcome_tx.send(DispatchOutcome { epoch, result });
        });
    }

    fn handle_dispatch_outcome(&mut self, outcome: DispatchOutcome) {
        if outcome.epoch != self.epoch || self.state != SessionState::Dispatching {
            debug!(epoch = outcome.epoch, current = self.epoch, "discarding stale reply");
            return;
        }

        match outcome.result {
            Ok(reply) => {
                info!(results = reply.results.len(), "assistant replied");
                self.conversation
                    .push_assistant(reply.reply_text.clone(), reply.results.clone());
                self.emit(SessionEvent::Reply {
                    text: reply.reply_text.clone(),
                    results: reply.results,
                });

                if reply.reply_text.trim().is_empty() {
                    self.transition_to(SessionState::Idle);
                    return;
                }

                match self.playback.speak(&reply.reply_text) {
                    Ok(_) => self.transition_to(SessionState::Speaking),
                    Err(e) => {
                        warn!(?e, "reply will not be spoken");
                        self.transition_to(SessionState::Idle);
                    }
                }
            }
            Err(e) => {
                error!(?e, "assistant query failed");
                self.conversation
                    .push_assistant(DISPATCH_FAILURE_REPLY, Vec::new());
                self.notify(ErrorKind::Dispatch);
                self.transition_to(SessionState::Idle);
            }
        }
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match &event {
            PlaybackEvent::Finished { utterance } => debug!(utterance, "reply spoken"),
            // Synthesis failures degrade to a text-only reply
            PlaybackEvent::Failed { utterance, error } => {
                debug!(kind = ?ErrorKind::Synthesis, utterance, %error, "reply not spoken");
            }
        }
        if self.state == SessionState::Speaking {
            self.transition_to(SessionState::Idle);
        }
    }

    /// Stop capture and playback, drop any in-flight reply, reset to Idle
    pub fn close(&mut self) {
        debug!(
            listening = self.capture.is_listening(),
            speaking = self.playback.is_speaking(),
            "closing session"
        );
        self.capture.stop();
        self.playback.stop();
        self.epoch += 1;
        self.interim = None;
        self.conversation.clear();
        self.transition_to(SessionState::Idle);
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: SessionState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        info!(from = %old_state, to = %new_state, "session transition");
        self.state = new_state;
        self.emit(SessionEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    fn notify(&self, kind: ErrorKind) {
        self.emit(SessionEvent::notice(kind));
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::dispatch::ProductResult;
    use crate::speech::testing::{FakeRecognizer, FakeSynthesizer};
    use crate::speech::{RecognitionEvent, RecognitionResult, RecognitionSettings};

    enum Scripted {
        Reply(AssistantReply),
        Fail,
        Delayed(Duration, AssistantReply),
        Hang,
    }

    #[derive(Default)]
    struct FakeDispatcher {
        script: Mutex<VecDeque<Scripted>>,
        queries: Mutex<Vec<QueryRequest>>,
    }

    impl FakeDispatcher {
        fn with(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.queries
                .lock()
                .unwrap()
                .iter()
                .map(|q| q.query.clone())
                .collect()
        }
    }

    #[async_trait]
    impl QueryDispatcher for FakeDispatcher {
        async fn query(&self, request: QueryRequest) -> Result<AssistantReply, DispatchError> {
            self.queries.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Reply(reply)) => Ok(reply),
                Some(Scripted::Fail) | None => {
                    Err(DispatchError::Transport("connection refused".to_string()))
                }
                Some(Scripted::Delayed(delay, reply)) => {
                    tokio::time::sleep(delay).await;
                    Ok(reply)
                }
                Some(Scripted::Hang) => std::future::pending().await,
            }
        }
    }

    fn reply(text: &str) -> AssistantReply {
        AssistantReply {
            reply_text: text.to_string(),
            results: vec![ProductResult {
                product_id: 7,
                title: "Wireless Headphones".to_string(),
                image: "https://img.example.com/7.jpg".to_string(),
                price: 89.99,
                category: Some("electronics".to_string()),
                score: None,
                summary: None,
            }],
        }
    }

    fn result(text: &str, is_final: bool) -> RecognitionEvent {
        RecognitionEvent::Result {
            result_index: 0,
            results: vec![RecognitionResult {
                transcript: text.to_string(),
                is_final,
            }],
        }
    }

    struct Harness {
        coordinator: Coordinator,
        recognizer: FakeRecognizer,
        synth: FakeSynthesizer,
        dispatcher: Arc<FakeDispatcher>,
        events: broadcast::Receiver<SessionEvent>,
        _commands_tx: mpsc::Sender<SessionCommand>,
        commands_rx: mpsc::Receiver<SessionCommand>,
    }

    impl Harness {
        fn new(script: Vec<Scripted>) -> Self {
            Self::build(script, true, true, Duration::from_secs(5))
        }

        fn build(
            script: Vec<Scripted>,
            with_recognizer: bool,
            with_synth: bool,
            timeout: Duration,
        ) -> Self {
            let recognizer = FakeRecognizer::new();
            let synth = FakeSynthesizer::new();
            let dispatcher = FakeDispatcher::with(script);
            let (event_tx, events) = broadcast::channel(64);
            let (commands_tx, commands_rx) = mpsc::channel(8);

            let capture = SpeechCapture::new(
                with_recognizer
                    .then(|| Box::new(recognizer.clone()) as Box<dyn crate::speech::RecognitionEngine>),
                RecognitionSettings::single_utterance("en-US"),
            );
            let playback = SpeechPlayback::new(
                with_synth
                    .then(|| Box::new(synth.clone()) as Box<dyn crate::speech::SynthesisEngine>),
                "en-US",
            );

            let coordinator = Coordinator::new(
                capture,
                playback,
                dispatcher.clone(),
                DispatchOptions {
                    result_limit: 8,
                    timeout,
                },
                event_tx,
            );

            Self {
                coordinator,
                recognizer,
                synth,
                dispatcher,
                events,
                _commands_tx: commands_tx,
                commands_rx,
            }
        }

        fn command(&mut self, command: SessionCommand) {
            self.coordinator.handle_command(command);
        }

        /// Process events until nothing arrives for a short while
        async fn settle(&mut self) {
            while let Ok(true) = tokio::time::timeout(
                Duration::from_millis(50),
                self.coordinator.tick(&mut self.commands_rx),
            )
            .await
            {}
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn notices(&mut self) -> Vec<ErrorKind> {
            self.drain_events()
                .into_iter()
                .filter_map(|e| match e {
                    SessionEvent::Notice { kind, .. } => Some(kind),
                    _ => None,
                })
                .collect()
        }

        fn state(&self) -> SessionState {
            self.coordinator.state()
        }
    }

    #[test]
    fn test_initial_state() {
        let harness = Harness::new(vec![]);
        assert_eq!(harness.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_voice_query_round_trip() {
        let mut h = Harness::new(vec![Scripted::Reply(reply("I found Wireless Headphones."))]);

        h.command(SessionCommand::StartCapture);
        assert_eq!(h.state(), SessionState::Listening);

        h.recognizer.emit(RecognitionEvent::Started);
        h.recognizer.emit(result("find wire", false));
        h.recognizer.emit(result("find wireless head", false));
        h.recognizer.emit(result("find wireless headphones", true));
        h.settle().await;

        assert_eq!(h.dispatcher.queries(), vec!["find wireless headphones"]);
        assert!(!h.recognizer.is_running());
        assert_eq!(h.state(), SessionState::Speaking);

        let spoken = h.synth.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "I found Wireless Headphones.");

        let events = h.drain_events();
        let interims: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::InterimTranscript { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(interims, vec!["find wire", "find wireless head"]);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Reply { results, .. } if results.len() == 1)));

        h.synth.finish(spoken[0].id);
        h.settle().await;
        assert_eq!(h.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_while_listening_stops_without_dispatch() {
        let mut h = Harness::new(vec![Scripted::Reply(reply("unused"))]);

        h.command(SessionCommand::StartCapture);
        h.recognizer.emit(result("find wire", false));
        h.settle().await;

        h.command(SessionCommand::StartCapture);
        assert_eq!(h.state(), SessionState::Idle);
        assert!(!h.recognizer.is_running());

        h.settle().await;
        assert!(h.dispatcher.queries().is_empty());
        assert!(h.coordinator.snapshot().interim_transcript.is_none());
    }

    #[tokio::test]
    async fn test_engine_end_without_final_returns_to_idle() {
        let mut h = Harness::new(vec![]);

        h.command(SessionCommand::StartCapture);
        h.recognizer.emit(result("uh", false));
        h.recognizer.emit(RecognitionEvent::Ended);
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert!(h.dispatcher.queries().is_empty());
    }

    #[tokio::test]
    async fn test_recognition_error_notifies_once() {
        let mut h = Harness::new(vec![]);

        h.command(SessionCommand::StartCapture);
        h.recognizer.emit(RecognitionEvent::Error {
            error: "network".to_string(),
        });
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert_eq!(h.notices(), vec![ErrorKind::Recognition]);
    }

    #[tokio::test]
    async fn test_unsupported_capture_notifies() {
        let mut h = Harness::build(vec![], false, true, Duration::from_secs(5));

        h.command(SessionCommand::StartCapture);
        assert_eq!(h.state(), SessionState::Idle);
        assert_eq!(h.notices(), vec![ErrorKind::Unsupported]);
        assert!(!h.coordinator.snapshot().capture_supported);
    }

    #[tokio::test]
    async fn test_dispatch_error_returns_to_idle_with_one_notice() {
        let mut h = Harness::new(vec![Scripted::Fail]);

        h.command(SessionCommand::SubmitQuery("mens jacket".to_string()));
        assert_eq!(h.state(), SessionState::Dispatching);
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert_eq!(h.notices(), vec![ErrorKind::Dispatch]);

        let turns = h.coordinator.snapshot().turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text, DISPATCH_FAILURE_REPLY);
        assert!(h.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_timeout_is_a_dispatch_error() {
        let mut h = Harness::build(vec![Scripted::Hang], true, true, Duration::from_millis(20));

        h.command(SessionCommand::SubmitQuery("backpack".to_string()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert_eq!(h.notices(), vec![ErrorKind::Dispatch]);
    }

    #[tokio::test]
    async fn test_empty_reply_skips_playback() {
        let mut h = Harness::new(vec![Scripted::Reply(AssistantReply::default())]);

        h.command(SessionCommand::SubmitQuery("anything".to_string()));
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert!(h.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_reply_without_synthesizer_stays_text_only() {
        let mut h = Harness::build(
            vec![Scripted::Reply(reply("Here you go"))],
            true,
            false,
            Duration::from_secs(5),
        );

        h.command(SessionCommand::SubmitQuery("rings".to_string()));
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert!(h.notices().is_empty());
        assert_eq!(h.coordinator.snapshot().turns[1].text, "Here you go");
    }

    #[tokio::test]
    async fn test_blank_query_ignored() {
        let mut h = Harness::new(vec![]);
        h.command(SessionCommand::SubmitQuery("   ".to_string()));
        assert_eq!(h.state(), SessionState::Idle);
        h.settle().await;
        assert!(h.dispatcher.queries().is_empty());
    }

    #[tokio::test]
    async fn test_query_while_dispatching_ignored() {
        let mut h = Harness::new(vec![Scripted::Hang]);

        h.command(SessionCommand::SubmitQuery("first".to_string()));
        h.settle().await;
        h.command(SessionCommand::SubmitQuery("second".to_string()));
        h.command(SessionCommand::StartCapture);
        h.settle().await;

        assert_eq!(h.dispatcher.queries(), vec!["first"]);
        assert_eq!(h.state(), SessionState::Dispatching);
        assert_eq!(h.recognizer.starts(), 0);
    }

    #[tokio::test]
    async fn test_mute_stops_playback() {
        let mut h = Harness::new(vec![Scripted::Reply(reply("Here are some shirts"))]);

        h.command(SessionCommand::SubmitQuery("shirts".to_string()));
        h.settle().await;
        assert_eq!(h.state(), SessionState::Speaking);

        h.command(SessionCommand::Mute);
        assert_eq!(h.state(), SessionState::Idle);
        assert_eq!(h.synth.cancels(), 1);
        assert!(!h.synth.is_speaking());
    }

    #[tokio::test]
    async fn test_new_query_while_speaking_supersedes_reply() {
        let mut h = Harness::new(vec![
            Scripted::Reply(reply("first answer")),
            Scripted::Reply(reply("second answer")),
        ]);

        h.command(SessionCommand::SubmitQuery("one".to_string()));
        h.settle().await;
        let first = h.synth.spoken()[0].id;

        h.command(SessionCommand::SubmitQuery("two".to_string()));
        h.settle().await;
        assert_eq!(h.state(), SessionState::Speaking);

        // A late report for the cancelled utterance must not end the session
        h.synth.finish(first);
        h.settle().await;
        assert_eq!(h.state(), SessionState::Speaking);

        let second = h.synth.spoken()[1].id;
        h.synth.finish(second);
        h.settle().await;
        assert_eq!(h.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_capture_while_speaking_barges_in() {
        let mut h = Harness::new(vec![Scripted::Reply(reply("Here are some shirts"))]);

        h.command(SessionCommand::SubmitQuery("shirts".to_string()));
        h.settle().await;

        h.command(SessionCommand::StartCapture);
        assert_eq!(h.state(), SessionState::Listening);
        assert!(!h.synth.is_speaking());
        assert!(h.recognizer.is_running());
    }

    #[tokio::test]
    async fn test_close_from_every_state_stops_everything() {
        // Listening
        let mut h = Harness::new(vec![]);
        h.command(SessionCommand::StartCapture);
        h.command(SessionCommand::Close);
        assert_eq!(h.state(), SessionState::Idle);
        assert!(!h.recognizer.is_running());

        // Speaking
        let mut h = Harness::new(vec![Scripted::Reply(reply("Here you go"))]);
        h.command(SessionCommand::SubmitQuery("hats".to_string()));
        h.settle().await;
        assert_eq!(h.state(), SessionState::Speaking);
        h.command(SessionCommand::Close);
        assert_eq!(h.state(), SessionState::Idle);
        assert!(!h.synth.is_speaking());
        assert!(h.coordinator.snapshot().turns.is_empty());

        // Idle
        let mut h = Harness::new(vec![]);
        h.command(SessionCommand::Close);
        assert_eq!(h.state(), SessionState::Idle);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_stale_reply_after_close_is_discarded() {
        let mut h = Harness::new(vec![Scripted::Delayed(
            Duration::from_millis(30),
            reply("too late"),
        )]);

        h.command(SessionCommand::SubmitQuery("watch".to_string()));
        assert_eq!(h.state(), SessionState::Dispatching);
        h.command(SessionCommand::Close);
        assert_eq!(h.state(), SessionState::Idle);
        h.drain_events();

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert!(h.synth.spoken().is_empty());
        assert!(!h
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Reply { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_command_reports_session() {
        let mut h = Harness::new(vec![]);

        h.command(SessionCommand::StartCapture);
        h.recognizer.emit(result("blue jea", false));
        h.settle().await;

        let (tx, rx) = oneshot::channel();
        h.command(SessionCommand::Snapshot(tx));
        let snapshot = rx.await.unwrap();

        assert_eq!(snapshot.state, SessionState::Listening);
        assert!(snapshot.capture_supported);
        assert!(snapshot.speech_output);
        assert_eq!(snapshot.interim_transcript.as_deref(), Some("blue jea"));
    }

    #[tokio::test]
    async fn test_missing_synthesizer_program_means_text_only() {
        let mut h = Harness::new(vec![Scripted::Reply(reply("Try these"))]);
        let missing = FakeSynthesizer::unavailable();
        h.coordinator.playback = SpeechPlayback::new(Some(Box::new(missing.clone())), "en-US");
        assert!(!h.coordinator.snapshot().speech_output);

        h.command(SessionCommand::SubmitQuery("running shoes".to_string()));
        h.settle().await;

        assert_eq!(h.state(), SessionState::Idle);
        assert!(missing.spoken().is_empty());
        assert!(h.notices().is_empty());
    }

    #[tokio::test]
    async fn test_run_exits_when_commands_close() {
        let h = Harness::new(vec![]);
        let mut coordinator = h.coordinator;
        let (tx, rx) = mpsc::channel(4);

        tx.send(SessionCommand::StartCapture).await.unwrap();
        drop(tx);
        coordinator.run(rx).await;

        assert_eq!(coordinator.state(), SessionState::Idle);
        assert!(!h.recognizer.is_running());
    }
}
