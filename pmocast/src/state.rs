//! Derived device state.
//!
//! [`MonitorState`] turns the raw values reported by sessions (foreground
//! application, player state, metadata) into the four debounced monitor
//! properties, and owns the idle and bootstrap timers that infer power-off
//! when the device stops reporting activity.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::events::MonitorEventBus;
use crate::model::{Media, MonitorEvent, PlayState, PowerState};
use crate::timer::{Timer, earliest};

/// Upward reporting path from sessions to the monitor.
pub trait StatusSink {
    /// Display name of the foreground application.
    fn set_application(&mut self, application: &str, now: Instant);

    /// Raw player state from a media status (`PLAYING`, `PAUSED`, ...).
    fn set_play_state(&mut self, player_state: &str, now: Instant);

    fn set_media(&mut self, media: Media);
}

pub struct MonitorState {
    power_state: Option<PowerState>,
    play_state: PlayState,
    application: Option<String>,
    media: Media,
    idle_timeout: Duration,
    idle_applications: Vec<String>,
    idle_timer: Timer,
    bootstrap_timer: Timer,
    bus: MonitorEventBus,
}

impl MonitorState {
    /// Starts with an unknown power state and arms the bootstrap timer.
    pub fn new(config: &MonitorConfig, bus: MonitorEventBus, now: Instant) -> Self {
        let mut bootstrap_timer = Timer::new();
        bootstrap_timer.arm(now, config.bootstrap_delay);

        Self {
            power_state: None,
            play_state: PlayState::default(),
            application: None,
            media: Media::default(),
            idle_timeout: config.idle_timeout,
            idle_applications: config.idle_applications.clone(),
            idle_timer: Timer::new(),
            bootstrap_timer,
            bus,
        }
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.power_state
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn idle_timer_armed(&self) -> bool {
        self.idle_timer.is_armed()
    }

    pub fn set_power_state(&mut self, power_state: PowerState) {
        if self.power_state == Some(power_state) {
            return;
        }
        self.power_state = Some(power_state);
        if power_state == PowerState::On {
            self.clear_idle_timer();
        }
        info!(power_state = %power_state, "power state changed");
        self.bus.broadcast(MonitorEvent::PowerState(power_state));
    }

    pub fn set_play_state(&mut self, player_state: &str, now: Instant) {
        let play_state = PlayState::from_player_state(player_state);
        if play_state == self.play_state {
            return;
        }

        match play_state {
            PlayState::Play => {
                self.set_power_state(PowerState::On);
                self.clear_idle_timer();
            }
            PlayState::Pause => self.set_idle_timer(now),
        }
        self.play_state = play_state;
        info!(play_state = %play_state, raw = player_state, "play state changed");
        self.bus.broadcast(MonitorEvent::PlayState(play_state));
    }

    pub fn set_media(&mut self, media: Media) {
        if media == self.media {
            return;
        }
        info!(artist = %media.artist, title = %media.title, "media changed");
        self.media = media.clone();
        self.bus.broadcast(MonitorEvent::Media(media));
    }

    /// Idle applications force power off and are stored silently.
    pub fn set_application(&mut self, application: &str, now: Instant) {
        if self.idle_applications.iter().any(|idle| idle == application) {
            self.set_power_state(PowerState::Off);
            self.application = Some(application.to_string());
            return;
        }

        self.set_power_state(PowerState::On);
        if self.play_state == PlayState::Pause {
            self.set_idle_timer(now);
        }
        if self.application.as_deref() != Some(application) {
            info!(application, "application changed");
            self.application = Some(application.to_string());
            self.bus
                .broadcast(MonitorEvent::Application(application.to_string()));
        }
    }

    /// (Re)arms the idle timer. A pending deadline is replaced.
    pub fn set_idle_timer(&mut self, now: Instant) {
        debug!(timeout = ?self.idle_timeout, "arming idle timer");
        self.idle_timer.arm(now, self.idle_timeout);
    }

    pub fn clear_idle_timer(&mut self) {
        if self.idle_timer.cancel() {
            debug!("idle timer cleared");
        }
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if self.bootstrap_timer.fire(now) && self.power_state.is_none() {
            debug!("no status before bootstrap deadline");
            self.set_power_state(PowerState::Off);
        }
        if self.idle_timer.fire(now) {
            debug!("idle timeout");
            self.set_power_state(PowerState::Off);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([self.bootstrap_timer.deadline(), self.idle_timer.deadline()])
    }
}

impl StatusSink for MonitorState {
    fn set_application(&mut self, application: &str, now: Instant) {
        MonitorState::set_application(self, application, now);
    }

    fn set_play_state(&mut self, player_state: &str, now: Instant) {
        MonitorState::set_play_state(self, player_state, now);
    }

    fn set_media(&mut self, media: Media) {
        MonitorState::set_media(self, media);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    fn setup() -> (MonitorState, Receiver<MonitorEvent>, Instant) {
        let bus = MonitorEventBus::new();
        let rx = bus.subscribe();
        let now = Instant::now();
        let config = MonitorConfig::new("Garage").with_idle_timeout(Duration::from_secs(60));
        (MonitorState::new(&config, bus, now), rx, now)
    }

    fn drain(rx: &Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_power_state_is_emitted_once() {
        let (mut state, rx, _) = setup();

        state.set_power_state(PowerState::On);
        state.set_power_state(PowerState::On);

        assert_eq!(drain(&rx), vec![MonitorEvent::PowerState(PowerState::On)]);
    }

    #[test]
    fn test_play_state_dedup_and_collapsing() {
        let (mut state, rx, now) = setup();

        for raw in ["PLAYING", "LOADING", "PAUSED", "IDLE", "BUFFERING", "PLAYING"] {
            state.set_play_state(raw, now);
        }

        let plays: Vec<_> = drain(&rx)
            .into_iter()
            .filter(|event| matches!(event, MonitorEvent::PlayState(_)))
            .collect();
        assert_eq!(
            plays,
            vec![
                MonitorEvent::PlayState(PlayState::Play),
                MonitorEvent::PlayState(PlayState::Pause),
                MonitorEvent::PlayState(PlayState::Play),
            ]
        );
    }

    #[test]
    fn test_play_forces_power_on_before_play_event() {
        let (mut state, rx, now) = setup();

        state.set_play_state("PLAYING", now);

        assert_eq!(
            drain(&rx),
            vec![
                MonitorEvent::PowerState(PowerState::On),
                MonitorEvent::PlayState(PlayState::Play),
            ]
        );
        assert!(!state.idle_timer_armed());
    }

    #[test]
    fn test_initial_pause_does_not_arm_idle_timer() {
        let (mut state, rx, now) = setup();

        state.set_play_state("PAUSED", now);

        assert!(drain(&rx).is_empty());
        assert!(!state.idle_timer_armed());
    }

    #[test]
    fn test_backdrop_forces_off_without_application_event() {
        let (mut state, rx, now) = setup();

        state.set_application("Backdrop", now);

        assert_eq!(drain(&rx), vec![MonitorEvent::PowerState(PowerState::Off)]);
        assert_eq!(state.application(), Some("Backdrop"));
    }

    #[test]
    fn test_application_event_only_on_change() {
        let (mut state, rx, now) = setup();

        state.set_application("Netflix", now);
        state.set_application("Netflix", now);
        state.set_application("Backdrop", now);
        state.set_application("Netflix", now);

        assert_eq!(
            drain(&rx),
            vec![
                MonitorEvent::PowerState(PowerState::On),
                MonitorEvent::Application("Netflix".to_string()),
                MonitorEvent::PowerState(PowerState::Off),
                MonitorEvent::PowerState(PowerState::On),
                MonitorEvent::Application("Netflix".to_string()),
            ]
        );
    }

    #[test]
    fn test_application_while_paused_arms_idle_timer() {
        let (mut state, rx, now) = setup();

        state.set_application("Spotify", now);
        assert!(state.idle_timer_armed());

        state.poll_timers(now + Duration::from_secs(59));
        assert_eq!(state.power_state(), Some(PowerState::On));

        state.poll_timers(now + Duration::from_secs(60));
        assert_eq!(state.power_state(), Some(PowerState::Off));
        assert_eq!(
            drain(&rx).last(),
            Some(&MonitorEvent::PowerState(PowerState::Off))
        );
    }

    #[test]
    fn test_rearming_idle_timer_supersedes() {
        let (mut state, rx, now) = setup();
        state.set_power_state(PowerState::On);
        drain(&rx);

        state.set_idle_timer(now);
        state.set_idle_timer(now + Duration::from_secs(30));

        state.poll_timers(now + Duration::from_secs(60));
        assert_eq!(state.power_state(), Some(PowerState::On));

        state.poll_timers(now + Duration::from_secs(90));
        state.poll_timers(now + Duration::from_secs(200));
        assert_eq!(drain(&rx), vec![MonitorEvent::PowerState(PowerState::Off)]);
    }

    #[test]
    fn test_power_on_clears_idle_timer() {
        let (mut state, _rx, now) = setup();
        state.set_power_state(PowerState::Off);
        state.set_idle_timer(now);

        state.set_power_state(PowerState::On);

        assert!(!state.idle_timer_armed());
    }

    #[test]
    fn test_media_dedup() {
        let (mut state, rx, _) = setup();

        state.set_media(Media::default());
        state.set_media(Media::new("A", "B"));
        state.set_media(Media::new("A", "B"));

        assert_eq!(drain(&rx), vec![MonitorEvent::Media(Media::new("A", "B"))]);
    }

    #[test]
    fn test_bootstrap_forces_off_once() {
        let (mut state, rx, now) = setup();
        assert_eq!(state.power_state(), None);
        assert_eq!(state.next_deadline(), Some(now + Duration::from_secs(2)));

        state.poll_timers(now + Duration::from_millis(1999));
        assert_eq!(state.power_state(), None);

        state.poll_timers(now + Duration::from_secs(2));
        state.poll_timers(now + Duration::from_secs(10));

        assert_eq!(drain(&rx), vec![MonitorEvent::PowerState(PowerState::Off)]);
        assert_eq!(state.next_deadline(), None);
    }

    #[test]
    fn test_bootstrap_is_noop_once_power_known() {
        let (mut state, rx, now) = setup();
        state.set_play_state("PLAYING", now);
        drain(&rx);

        state.poll_timers(now + Duration::from_secs(2));

        assert_eq!(state.power_state(), Some(PowerState::On));
        assert!(drain(&rx).is_empty());
    }
}
