//! Turn and game-flow state machine
//!
//! Tracks turn order, the current player, the turn counter, the connected
//! subset of players, idleness and the match phase. Card rules are
//! delegated to the match's [`RulesEngine`]; this type only decides whose
//! turn it is and what a player may do right now.
//!
//! Every mutating operation re-checks its preconditions and returns the
//! [`FlowEvent`]s it caused so the caller can broadcast them after
//! releasing the lock.

use crate::rules::RulesEngine;
use codex_core::{DrawSource, GameState, MatchStatus, Position, Refusal};

pub type FlowResult<T> = std::result::Result<T, Refusal>;

/// Within a turn: place first, then draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingPlacement,
    AwaitingDraw,
}

/// Observable change caused by a flow operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    TurnChanged { player: String, turn: u32 },
    StateChanged(GameState),
    IdleChanged(bool),
}

struct Seat {
    name: String,
    connected: bool,
    departed: bool,
    set_up: bool,
}

pub struct GameFlow {
    seats: Vec<Seat>,
    current: usize,
    turn: u32,
    state: GameState,
    phase: TurnPhase,
    idle: bool,
    last_round_trigger: Option<usize>,
    winner_taken: bool,
    rules: Box<dyn RulesEngine>,
}

impl GameFlow {
    /// Start a match in `Setting` with everyone connected. `players` is the
    /// fixed turn order.
    pub fn new(players: Vec<String>, rules: Box<dyn RulesEngine>) -> Self {
        let idle = players.len() < 2;
        Self {
            seats: players
                .into_iter()
                .map(|name| Seat {
                    name,
                    connected: true,
                    departed: false,
                    set_up: false,
                })
                .collect(),
            current: 0,
            turn: 0,
            state: GameState::Setting,
            phase: TurnPhase::AwaitingPlacement,
            idle,
            last_round_trigger: None,
            winner_taken: false,
            rules,
        }
    }

    pub fn players(&self) -> Vec<String> {
        self.seats.iter().map(|seat| seat.name.clone()).collect()
    }

    pub fn connected_players(&self) -> Vec<String> {
        self.seats
            .iter()
            .filter(|seat| seat.connected)
            .map(|seat| seat.name.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.seats.iter().filter(|seat| seat.connected).count()
    }

    pub fn current_player(&self) -> &str {
        &self.seats[self.current].name
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Snapshot sent to a player resuming the match
    pub fn status(&self) -> MatchStatus {
        MatchStatus {
            current: self.current_player().to_string(),
            turn: self.turn,
            state: self.state,
            idle: self.idle,
            awaiting_draw: self.is_running() && self.phase == TurnPhase::AwaitingDraw,
        }
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.seat_of(name).is_some()
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.seat_of(name)
            .is_some_and(|seat| self.seats[seat].connected)
    }

    /// A disconnected player who has not left for good
    pub fn can_reconnect(&self, name: &str) -> bool {
        self.seat_of(name).is_some_and(|seat| {
            let seat = &self.seats[seat];
            !seat.connected && !seat.departed
        })
    }

    pub fn score(&self, name: &str) -> i64 {
        self.rules.compute_score(name)
    }

    pub fn has_empty_slot(&self, name: &str) -> bool {
        self.rules.has_empty_slot(name)
    }

    fn seat_of(&self, name: &str) -> Option<usize> {
        self.seats.iter().position(|seat| seat.name == name)
    }

    fn active_seat(&self, name: &str) -> FlowResult<usize> {
        match self.seat_of(name) {
            Some(seat) if self.seats[seat].connected => Ok(seat),
            _ => Err(Refusal::NotInMatch),
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state, GameState::Playing | GameState::LastRound)
    }

    /// Record a setup choice; play begins once every connected player chose
    pub fn choose_setup(&mut self, name: &str, starter_face_up: bool, goal: usize) -> FlowResult<Vec<FlowEvent>> {
        let seat = self.active_seat(name)?;
        if self.state != GameState::Setting || self.seats[seat].set_up {
            return Err(Refusal::WrongPhase);
        }
        self.rules.choose_setup(name, starter_face_up, goal)?;
        self.seats[seat].set_up = true;

        let mut events = Vec::new();
        self.begin_play_if_ready(&mut events);
        Ok(events)
    }

    fn begin_play_if_ready(&mut self, events: &mut Vec<FlowEvent>) {
        if self.state != GameState::Setting
            || self.seats.iter().any(|seat| seat.connected && !seat.set_up)
        {
            return;
        }
        for seat in self.seats.iter_mut().filter(|seat| !seat.set_up) {
            self.rules.auto_setup(&seat.name);
            seat.set_up = true;
        }

        self.state = GameState::Playing;
        self.phase = TurnPhase::AwaitingPlacement;
        events.push(FlowEvent::StateChanged(GameState::Playing));

        // Turn 1 goes to the first connected player in turn order
        self.current = self.seats.iter().position(|seat| seat.connected).unwrap_or(0);
        self.turn = 1;
        events.push(FlowEvent::TurnChanged {
            player: self.seats[self.current].name.clone(),
            turn: self.turn,
        });
    }

    fn check_turn(&self, name: &str, phase: TurnPhase) -> FlowResult<()> {
        if !self.is_running() {
            return Err(Refusal::WrongPhase);
        }
        if self.idle {
            return Err(Refusal::MatchIdle);
        }
        if self.seats[self.current].name != name {
            return Err(Refusal::NotYourTurn);
        }
        if self.phase != phase {
            return Err(Refusal::WrongPhase);
        }
        Ok(())
    }

    pub fn place_card(
        &mut self,
        name: &str,
        hand_slot: usize,
        position: Position,
        face_up: bool,
    ) -> FlowResult<Vec<FlowEvent>> {
        self.check_turn(name, TurnPhase::AwaitingPlacement)?;
        let outcome = self.rules.place_card(name, hand_slot, position, face_up)?;

        let mut events = Vec::new();
        if outcome.last_round && self.state == GameState::Playing {
            self.state = GameState::LastRound;
            self.last_round_trigger = Some(self.current);
            events.push(FlowEvent::StateChanged(GameState::LastRound));
        }
        if outcome.can_draw {
            self.phase = TurnPhase::AwaitingDraw;
        } else {
            self.advance(&mut events);
        }
        Ok(events)
    }

    pub fn draw_card(&mut self, name: &str, source: DrawSource) -> FlowResult<Vec<FlowEvent>> {
        self.check_turn(name, TurnPhase::AwaitingDraw)?;
        self.rules.draw_card(name, source)?;

        let mut events = Vec::new();
        self.advance(&mut events);
        Ok(events)
    }

    /// Hand the turn to the next connected player, wrapping. In the final
    /// round, reaching the trigger player's seat ends the game instead.
    fn advance(&mut self, events: &mut Vec<FlowEvent>) {
        self.phase = TurnPhase::AwaitingPlacement;
        let count = self.seats.len();
        for step in 1..=count {
            let seat = (self.current + step) % count;
            if self.state == GameState::LastRound && self.last_round_trigger == Some(seat) {
                self.state = GameState::PostGame;
                events.push(FlowEvent::StateChanged(GameState::PostGame));
                return;
            }
            if self.seats[seat].connected {
                self.current = seat;
                self.turn += 1;
                events.push(FlowEvent::TurnChanged {
                    player: self.seats[seat].name.clone(),
                    turn: self.turn,
                });
                return;
            }
        }
    }

    fn update_idle(&mut self, events: &mut Vec<FlowEvent>) {
        let idle = self.connected_count() < 2;
        if idle != self.idle {
            self.idle = idle;
            events.push(FlowEvent::IdleChanged(idle));
        }
    }

    /// Remove a player from the connected set, completing their pending
    /// turn or setup on their behalf. Idempotent.
    pub fn disconnect_player(&mut self, name: &str) -> FlowResult<Vec<FlowEvent>> {
        let seat = self.seat_of(name).ok_or(Refusal::NotInMatch)?;
        let mut events = Vec::new();
        if !self.seats[seat].connected {
            return Ok(events);
        }
        self.seats[seat].connected = false;

        match self.state {
            GameState::Setting => {
                if !self.seats[seat].set_up {
                    self.rules.auto_setup(name);
                    self.seats[seat].set_up = true;
                }
                self.begin_play_if_ready(&mut events);
            }
            GameState::Playing | GameState::LastRound if seat == self.current => {
                if self.rules.has_empty_slot(name) {
                    self.rules.auto_draw(name);
                }
                self.advance(&mut events);
            }
            _ => {}
        }

        self.update_idle(&mut events);
        Ok(events)
    }

    /// Leave the match for good; the player cannot reconnect afterwards
    pub fn depart_player(&mut self, name: &str) -> FlowResult<Vec<FlowEvent>> {
        let events = self.disconnect_player(name)?;
        if let Some(seat) = self.seat_of(name) {
            self.seats[seat].departed = true;
        }
        Ok(events)
    }

    /// Put a disconnected player back into the connected set.
    ///
    /// The turn order is unchanged; if the match was idle on a disconnected
    /// player's turn, the turn moves on to the next connected player.
    pub fn reconnect_player(&mut self, name: &str) -> FlowResult<Vec<FlowEvent>> {
        let seat = self.seat_of(name).ok_or(Refusal::NotInMatch)?;
        if self.seats[seat].departed {
            return Err(Refusal::NotInMatch);
        }
        let mut events = Vec::new();
        if self.seats[seat].connected {
            return Ok(events);
        }
        self.seats[seat].connected = true;
        self.update_idle(&mut events);

        if self.is_running() && !self.idle && !self.seats[self.current].connected {
            self.advance(&mut events);
        }
        Ok(events)
    }

    /// Single-shot winner query.
    ///
    /// The first call returns the unique top scorer, or `None` on a tie or
    /// when the game has not ended. Every later call is `NoActiveGame`.
    pub fn take_winner(&mut self) -> FlowResult<Option<String>> {
        if self.winner_taken {
            return Err(Refusal::NoActiveGame);
        }
        self.winner_taken = true;
        if self.state != GameState::PostGame {
            return Ok(None);
        }

        let scores: Vec<(i64, &str)> = self
            .seats
            .iter()
            .map(|seat| (self.rules.compute_score(&seat.name), seat.name.as_str()))
            .collect();
        let Some(best) = scores.iter().map(|(score, _)| *score).max() else {
            return Ok(None);
        };
        let mut leaders = scores.iter().filter(|(score, _)| *score == best);
        match (leaders.next(), leaders.next()) {
            (Some((_, name)), None) => Ok(Some(name.to_string())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PlacementOutcome, RuleResult, Tally};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Engine whose outcomes are set by the test
    #[derive(Clone, Default)]
    struct Script {
        last_round_on_place: Arc<Mutex<bool>>,
        can_draw: Arc<Mutex<bool>>,
        scores: Arc<Mutex<HashMap<String, i64>>>,
        auto_setups: Arc<Mutex<Vec<String>>>,
    }

    impl RulesEngine for Script {
        fn choose_setup(&mut self, _player: &str, _face_up: bool, _goal: usize) -> RuleResult<()> {
            Ok(())
        }
        fn auto_setup(&mut self, player: &str) {
            self.auto_setups.lock().unwrap().push(player.to_string());
        }
        fn place_card(&mut self, _p: &str, _s: usize, _pos: Position, _f: bool) -> RuleResult<PlacementOutcome> {
            Ok(PlacementOutcome {
                last_round: *self.last_round_on_place.lock().unwrap(),
                can_draw: *self.can_draw.lock().unwrap(),
            })
        }
        fn draw_card(&mut self, _player: &str, _source: DrawSource) -> RuleResult<()> {
            Ok(())
        }
        fn auto_draw(&mut self, _player: &str) {}
        fn compute_score(&self, player: &str) -> i64 {
            self.scores.lock().unwrap().get(player).copied().unwrap_or(0)
        }
        fn has_empty_slot(&self, _player: &str) -> bool {
            false
        }
    }

    fn playing(players: &[&str]) -> GameFlow {
        let players = names(players);
        let mut flow = GameFlow::new(players.clone(), Box::new(Tally::new(&players, 40)));
        for player in &players {
            flow.choose_setup(player, true, 0).unwrap();
        }
        flow
    }

    fn scripted(players: &[&str], script: &Script) -> GameFlow {
        let players = names(players);
        let mut flow = GameFlow::new(players.clone(), Box::new(script.clone()));
        for player in &players {
            flow.choose_setup(player, true, 0).unwrap();
        }
        flow
    }

    #[test]
    fn test_setup_starts_play() {
        let players = names(&["a1a", "b2b"]);
        let mut flow = GameFlow::new(players.clone(), Box::new(Tally::new(&players, 40)));
        assert_eq!(flow.state(), GameState::Setting);
        assert!(flow.choose_setup("a1a", true, 0).unwrap().is_empty());
        assert_eq!(flow.choose_setup("a1a", true, 0), Err(Refusal::WrongPhase));

        let events = flow.choose_setup("b2b", false, 1).unwrap();
        assert_eq!(
            events,
            vec![
                FlowEvent::StateChanged(GameState::Playing),
                FlowEvent::TurnChanged { player: "a1a".into(), turn: 1 },
            ]
        );
        assert_eq!(flow.current_player(), "a1a");
    }

    #[test]
    fn test_disconnect_during_setup_auto_completes() {
        let script = Script::default();
        let players = names(&["ann", "ben", "cat"]);
        let mut flow = GameFlow::new(players, Box::new(script.clone()));
        flow.choose_setup("ann", true, 0).unwrap();
        flow.choose_setup("cat", true, 0).unwrap();

        let events = flow.disconnect_player("ben").unwrap();
        assert_eq!(*script.auto_setups.lock().unwrap(), vec!["ben".to_string()]);
        assert_eq!(flow.state(), GameState::Playing);
        assert!(events.contains(&FlowEvent::StateChanged(GameState::Playing)));
    }

    #[test]
    fn test_turn_cycle() {
        let mut flow = playing(&["ann", "ben", "cat"]);
        assert_eq!(flow.draw_card("ann", DrawSource::Deck), Err(Refusal::WrongPhase));
        assert_eq!(
            flow.place_card("ben", 0, Position::new(1, 0), true),
            Err(Refusal::NotYourTurn)
        );

        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        assert_eq!(flow.phase(), TurnPhase::AwaitingDraw);
        let events = flow.draw_card("ann", DrawSource::Deck).unwrap();
        assert_eq!(events, vec![FlowEvent::TurnChanged { player: "ben".into(), turn: 2 }]);

        flow.place_card("ben", 0, Position::new(1, 0), true).unwrap();
        flow.draw_card("ben", DrawSource::Deck).unwrap();
        flow.place_card("cat", 0, Position::new(1, 0), true).unwrap();
        flow.draw_card("cat", DrawSource::Deck).unwrap();
        assert_eq!(flow.current_player(), "ann");
        assert_eq!(flow.turn(), 4);
    }

    #[test]
    fn test_disconnecting_current_player_advances_and_fills_hand() {
        let mut flow = playing(&["ann", "ben", "cat", "dan"]);
        flow.place_card("ann", 1, Position::new(0, 1), true).unwrap();
        assert!(flow.has_empty_slot("ann"));

        let events = flow.disconnect_player("ann").unwrap();
        assert_eq!(events, vec![FlowEvent::TurnChanged { player: "ben".into(), turn: 2 }]);
        assert_eq!(flow.current_player(), "ben");
        assert!(!flow.has_empty_slot("ann"));
        assert!(!flow.is_idle());
        assert_eq!(flow.phase(), TurnPhase::AwaitingPlacement);
    }

    #[test]
    fn test_disconnected_players_are_skipped() {
        let mut flow = playing(&["ann", "ben", "cat"]);
        flow.disconnect_player("ben").unwrap();
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        flow.draw_card("ann", DrawSource::Deck).unwrap();
        assert_eq!(flow.current_player(), "cat");
    }

    #[test]
    fn test_idle_below_two_connected() {
        let mut flow = playing(&["ann", "ben", "cat", "dan"]);
        flow.disconnect_player("ben").unwrap();
        flow.disconnect_player("cat").unwrap();
        assert!(!flow.is_idle());

        let events = flow.disconnect_player("dan").unwrap();
        assert_eq!(events, vec![FlowEvent::IdleChanged(true)]);
        assert!(flow.is_idle());
        assert_eq!(
            flow.place_card("ann", 0, Position::new(1, 0), true),
            Err(Refusal::MatchIdle)
        );
        assert_eq!(flow.draw_card("ann", DrawSource::Deck), Err(Refusal::MatchIdle));

        let events = flow.reconnect_player("cat").unwrap();
        assert_eq!(events, vec![FlowEvent::IdleChanged(false)]);
        // Order preserved: the turn stays with ann
        assert_eq!(flow.current_player(), "ann");
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
    }

    #[test]
    fn test_status_reports_idle_and_phase() {
        let mut flow = playing(&["ann", "ben"]);
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        let status = flow.status();
        assert_eq!(status.current, "ann");
        assert_eq!(status.state, GameState::Playing);
        assert!(status.awaiting_draw);
        assert!(!status.idle);

        flow.disconnect_player("ben").unwrap();
        let status = flow.status();
        assert!(status.idle);
        assert!(status.awaiting_draw);
    }

    #[test]
    fn test_idle_on_absent_players_turn_moves_on_after_reconnect() {
        let mut flow = playing(&["ann", "ben"]);
        let events = flow.disconnect_player("ann").unwrap();
        assert_eq!(
            events,
            vec![
                FlowEvent::TurnChanged { player: "ben".into(), turn: 2 },
                FlowEvent::IdleChanged(true),
            ]
        );
        flow.disconnect_player("ben").unwrap();
        assert_eq!(flow.connected_count(), 0);

        flow.reconnect_player("ann").unwrap();
        let events = flow.reconnect_player("ann").unwrap();
        assert!(events.is_empty());
        let events = flow.reconnect_player("ben").unwrap();
        assert_eq!(events, vec![FlowEvent::IdleChanged(false)]);
        assert_eq!(flow.current_player(), "ben");
    }

    #[test]
    fn test_departed_player_cannot_reconnect() {
        let mut flow = playing(&["ann", "ben", "cat"]);
        flow.depart_player("cat").unwrap();
        assert!(!flow.can_reconnect("cat"));
        assert_eq!(flow.reconnect_player("cat"), Err(Refusal::NotInMatch));
        flow.disconnect_player("ben").unwrap();
        assert!(flow.can_reconnect("ben"));
        assert_eq!(flow.reconnect_player("zed"), Err(Refusal::NotInMatch));
    }

    #[test]
    fn test_last_round_ends_at_trigger_player() {
        let script = Script::default();
        *script.can_draw.lock().unwrap() = true;
        let mut flow = scripted(&["ann", "ben", "cat"], &script);

        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        flow.draw_card("ann", DrawSource::Deck).unwrap();

        *script.last_round_on_place.lock().unwrap() = true;
        let events = flow.place_card("ben", 0, Position::new(1, 0), true).unwrap();
        assert_eq!(events, vec![FlowEvent::StateChanged(GameState::LastRound)]);
        *script.last_round_on_place.lock().unwrap() = false;
        flow.draw_card("ben", DrawSource::Deck).unwrap();

        flow.place_card("cat", 0, Position::new(1, 0), true).unwrap();
        flow.draw_card("cat", DrawSource::Deck).unwrap();
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        let events = flow.draw_card("ann", DrawSource::Deck).unwrap();
        assert_eq!(events, vec![FlowEvent::StateChanged(GameState::PostGame)]);
        assert_eq!(
            flow.place_card("ben", 0, Position::new(1, 0), true),
            Err(Refusal::WrongPhase)
        );
    }

    #[test]
    fn test_no_draw_possible_ends_turn_after_placement() {
        let script = Script::default();
        let mut flow = scripted(&["ann", "ben"], &script);
        let events = flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        assert_eq!(events, vec![FlowEvent::TurnChanged { player: "ben".into(), turn: 2 }]);
    }

    #[test]
    fn test_winner_query_is_single_shot() {
        let script = Script::default();
        let mut flow = scripted(&["ann", "ben"], &script);
        script.scores.lock().unwrap().insert("ben".into(), 12);
        script.scores.lock().unwrap().insert("ann".into(), 9);

        *script.last_round_on_place.lock().unwrap() = true;
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        *script.last_round_on_place.lock().unwrap() = false;
        flow.place_card("ben", 0, Position::new(1, 0), true).unwrap();
        assert_eq!(flow.state(), GameState::PostGame);

        assert_eq!(flow.take_winner(), Ok(Some("ben".to_string())));
        assert_eq!(flow.take_winner(), Err(Refusal::NoActiveGame));
    }

    #[test]
    fn test_winner_query_tie_and_in_progress() {
        let mut flow = playing(&["ann", "ben"]);
        assert_eq!(flow.take_winner(), Ok(None));
        assert_eq!(flow.take_winner(), Err(Refusal::NoActiveGame));

        let script = Script::default();
        let mut flow = scripted(&["ann", "ben"], &script);
        *script.last_round_on_place.lock().unwrap() = true;
        flow.place_card("ann", 0, Position::new(1, 0), true).unwrap();
        flow.place_card("ben", 0, Position::new(1, 0), true).unwrap();
        assert_eq!(flow.state(), GameState::PostGame);
        assert_eq!(flow.take_winner(), Ok(None));
    }
}
