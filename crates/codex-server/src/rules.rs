//! Rules engine seam
//!
//! The card and scoring rules live behind [`RulesEngine`]. The session
//! layer only asks it to apply placements and draws, to complete a
//! disconnected player's pending choices, and to report scores. One engine
//! instance is created per match through a [`RulesFactory`].

use codex_core::{DrawSource, Position, Refusal};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a rules query; refusals keep the session alive
pub type RuleResult<T> = std::result::Result<T, Refusal>;

/// What a placement did to the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementOutcome {
    /// The final round is triggered by this placement
    pub last_round: bool,
    /// A card can still be drawn to refill the hand
    pub can_draw: bool,
}

/// Trait for implementing card rules
///
/// Implementations own all card state for one match. Player names are the
/// ones passed to the factory, in turn order.
pub trait RulesEngine: Send + 'static {
    /// Record a player's setup choice (starter orientation and goal)
    fn choose_setup(&mut self, player: &str, starter_face_up: bool, goal: usize) -> RuleResult<()>;

    /// Complete the setup of a player who cannot choose
    fn auto_setup(&mut self, player: &str);

    /// Play the card in `hand_slot` at `position`
    fn place_card(
        &mut self,
        player: &str,
        hand_slot: usize,
        position: Position,
        face_up: bool,
    ) -> RuleResult<PlacementOutcome>;

    /// Refill an empty hand slot from `source`
    fn draw_card(&mut self, player: &str, source: DrawSource) -> RuleResult<()>;

    /// Refill the player's hand on their behalf, if anything can be drawn
    fn auto_draw(&mut self, player: &str);

    fn compute_score(&self, player: &str) -> i64;

    fn has_empty_slot(&self, player: &str) -> bool;
}

/// Builds one engine per match from the turn order
pub type RulesFactory = Arc<dyn Fn(&[String]) -> Box<dyn RulesEngine> + Send + Sync>;

/// Score that triggers the final round
pub const TARGET_SCORE: i64 = 20;
/// Cards held by each player
pub const HAND_SIZE: usize = 3;
/// Face-up cards available to draw
pub const MARKET_SIZE: usize = 2;
/// Goals offered during setup
pub const GOAL_CHOICES: usize = 2;
/// Deck size used by [`tally_factory`]
pub const DEFAULT_DECK: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Card {
    points: i64,
}

#[derive(Debug, Default)]
struct Hand {
    slots: [Option<Card>; HAND_SIZE],
    board: HashMap<Position, Card>,
    score: i64,
    goal: Option<usize>,
}

impl Hand {
    fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

/// Reference engine: shared deck, three-slot hands, one card per board
/// position, points for face-up cards.
#[derive(Debug)]
pub struct Tally {
    deck: Vec<Card>,
    market: Vec<Card>,
    hands: HashMap<String, Hand>,
    last_round_signalled: bool,
}

impl Tally {
    /// Deal hands and market from a deck of `deck_size` cards worth 1 to 3
    pub fn new(players: &[String], deck_size: usize) -> Self {
        // Drawn from the back, so the first card built is the last drawn
        let mut deck: Vec<Card> = (0..deck_size)
            .map(|i| Card {
                points: (i % 3) as i64 + 1,
            })
            .collect();
        let mut hands = HashMap::new();
        for player in players {
            let mut hand = Hand::default();
            for slot in hand.slots.iter_mut() {
                *slot = deck.pop();
            }
            hand.board.insert(Position::new(0, 0), Card { points: 0 });
            hands.insert(player.clone(), hand);
        }
        let mut market = Vec::with_capacity(MARKET_SIZE);
        for _ in 0..MARKET_SIZE {
            if let Some(card) = deck.pop() {
                market.push(card);
            }
        }
        Self {
            deck,
            market,
            hands,
            last_round_signalled: false,
        }
    }

    fn hand(&self, player: &str) -> RuleResult<&Hand> {
        self.hands.get(player).ok_or(Refusal::NotInMatch)
    }

    fn hand_mut(&mut self, player: &str) -> RuleResult<&mut Hand> {
        self.hands.get_mut(player).ok_or(Refusal::NotInMatch)
    }

    fn can_draw(&self) -> bool {
        !self.deck.is_empty() || !self.market.is_empty()
    }

    fn take(&mut self, source: DrawSource) -> RuleResult<Card> {
        match source {
            DrawSource::Deck => self
                .deck
                .pop()
                .ok_or_else(|| Refusal::InvalidMove("deck is empty".into())),
            DrawSource::Market(index) => {
                let index = usize::from(index);
                if index >= self.market.len() {
                    return Err(Refusal::InvalidMove("no such market card".into()));
                }
                let card = self.market.remove(index);
                if let Some(refill) = self.deck.pop() {
                    self.market.insert(index, refill);
                }
                Ok(card)
            }
        }
    }

    pub fn deck_len(&self) -> usize {
        self.deck.len()
    }
}

/// Factory for [`Tally`] engines with the default deck
pub fn tally_factory() -> RulesFactory {
    Arc::new(|players: &[String]| Box::new(Tally::new(players, DEFAULT_DECK)) as Box<dyn RulesEngine>)
}

impl RulesEngine for Tally {
    fn choose_setup(&mut self, player: &str, starter_face_up: bool, goal: usize) -> RuleResult<()> {
        if goal >= GOAL_CHOICES {
            return Err(Refusal::InvalidMove("no such goal".into()));
        }
        let hand = self.hand_mut(player)?;
        if hand.goal.is_some() {
            return Err(Refusal::InvalidMove("setup already chosen".into()));
        }
        hand.goal = Some(goal);
        if starter_face_up {
            hand.board.insert(Position::new(0, 0), Card { points: 1 });
            hand.score += 1;
        }
        Ok(())
    }

    fn auto_setup(&mut self, player: &str) {
        if let Ok(hand) = self.hand_mut(player) {
            if hand.goal.is_none() {
                hand.goal = Some(0);
            }
        }
    }

    fn place_card(
        &mut self,
        player: &str,
        hand_slot: usize,
        position: Position,
        face_up: bool,
    ) -> RuleResult<PlacementOutcome> {
        let hand = self.hand_mut(player)?;
        let card = hand
            .slots
            .get(hand_slot)
            .copied()
            .flatten()
            .ok_or_else(|| Refusal::InvalidMove("empty hand slot".into()))?;
        if hand.board.contains_key(&position) {
            return Err(Refusal::InvalidMove("position occupied".into()));
        }
        let touches_board = [(1, 0), (-1, 0), (0, 1), (0, -1)].iter().any(|(dx, dy)| {
            hand.board
                .contains_key(&Position::new(position.x + dx, position.y + dy))
        });
        if !touches_board {
            return Err(Refusal::InvalidMove("position not adjacent".into()));
        }

        hand.slots[hand_slot] = None;
        hand.board.insert(position, card);
        if face_up {
            hand.score += card.points;
        }
        let reached_target = hand.score >= TARGET_SCORE;

        let exhausted = !self.can_draw();
        let last_round = (reached_target || exhausted) && !self.last_round_signalled;
        if last_round {
            self.last_round_signalled = true;
        }
        Ok(PlacementOutcome {
            last_round,
            can_draw: !exhausted,
        })
    }

    fn draw_card(&mut self, player: &str, source: DrawSource) -> RuleResult<()> {
        let slot = self
            .hand(player)?
            .first_empty()
            .ok_or_else(|| Refusal::InvalidMove("hand is full".into()))?;
        let card = self.take(source)?;
        self.hand_mut(player)?.slots[slot] = Some(card);
        Ok(())
    }

    fn auto_draw(&mut self, player: &str) {
        let Ok(hand) = self.hand(player) else { return };
        if hand.first_empty().is_none() {
            return;
        }
        let source = if self.deck.is_empty() {
            DrawSource::Market(0)
        } else {
            DrawSource::Deck
        };
        // Nothing left anywhere leaves the slot empty
        let _ = self.draw_card(player, source);
    }

    fn compute_score(&self, player: &str) -> i64 {
        self.hands.get(player).map(|hand| hand.score).unwrap_or(0)
    }

    fn has_empty_slot(&self, player: &str) -> bool {
        self.hands
            .get(player)
            .is_some_and(|hand| hand.first_empty().is_some())
    }
}
