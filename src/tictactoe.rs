//! Tic-Tac-Toe Engine (C9, §4.9).
//!
//! Turn-based 3x3 games with validation, win/draw detection and
//! resignation. Errors return a typed result rather than throwing, per the
//! §9 design note: "where the source uses exceptions for control flow... return
//! a result value and map it at the HTTP boundary."

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::events::Broadcaster;
use crate::presence::PresenceRegistry;

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub enum Mark {
    X,
    O,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub enum GameStatus {
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "WON_X")]
    WonX,
    #[serde(rename = "WON_O")]
    WonO,
    #[serde(rename = "DRAW")]
    Draw,
    #[serde(rename = "RESIGNED")]
    Resigned,
}

#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LastMove {
    pub by: String,
    pub row: usize,
    pub col: usize,
}

#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: u64,
    pub player_x: String,
    pub player_o: String,
    pub board: [[Option<Mark>; 3]; 3],
    pub current_turn: Option<Mark>,
    pub status: GameStatus,
    pub winner: Option<String>,
    pub last_move: Option<LastMove>,
}

impl Game {
    fn player_for(&self, mark: Mark) -> &str {
        match mark {
            Mark::X => &self.player_x,
            Mark::O => &self.player_o,
        }
    }

    fn mark_of(&self, player: &str) -> Option<Mark> {
        if self.player_x == player {
            Some(Mark::X)
        } else if self.player_o == player {
            Some(Mark::O)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub enum GameError {
    IllegalArgument(String),
    IllegalState(String),
    NotFound,
}

const LINES: [[(usize, usize); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

pub struct TicTacToeEngine {
    games: RwLock<HashMap<u64, Game>>,
    /// username -> active game id, so "already busy" can be checked in O(1).
    active_by_user: RwLock<HashMap<String, u64>>,
    next_id: AtomicU64,
    presence: Arc<PresenceRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl TicTacToeEngine {
    pub fn new(presence: Arc<PresenceRegistry>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            active_by_user: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            presence,
            broadcaster,
        }
    }

    /// `initiator` plays X and moves first (§3 invariants).
    pub fn start(&self, initiator: &str, opponent: &str) -> Result<Game, GameError> {
        if initiator == opponent {
            return Err(GameError::IllegalArgument("cannot play yourself".into()));
        }
        if !self.presence.is_present(initiator) || !self.presence.is_present(opponent) {
            return Err(GameError::IllegalArgument("both players must be online".into()));
        }

        let mut active = self.active_by_user.write();
        if active.contains_key(initiator) || active.contains_key(opponent) {
            return Err(GameError::IllegalState("a player is already in a game".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let game = Game {
            id,
            player_x: initiator.to_string(),
            player_o: opponent.to_string(),
            board: [[None; 3]; 3],
            current_turn: Some(Mark::X),
            status: GameStatus::InProgress,
            winner: None,
            last_move: None,
        };

        active.insert(initiator.to_string(), id);
        active.insert(opponent.to_string(), id);
        drop(active);

        self.games.write().insert(id, game.clone());
        self.push("TICTACTOE_START", &game);
        Ok(game)
    }

    pub fn make_move(&self, game_id: u64, player: &str, row: usize, col: usize) -> Result<Game, GameError> {
        if row > 2 || col > 2 {
            return Err(GameError::IllegalArgument("position off-board".into()));
        }

        let mut games = self.games.write();
        let game = games.get_mut(&game_id).ok_or(GameError::NotFound)?;

        let mark = game
            .mark_of(player)
            .ok_or_else(|| GameError::IllegalArgument("not a participant".into()))?;

        if game.status != GameStatus::InProgress {
            return Err(GameError::IllegalState("game is finished".into()));
        }
        if game.current_turn != Some(mark) {
            return Err(GameError::IllegalState("not your turn".into()));
        }
        if game.board[row][col].is_some() {
            return Err(GameError::IllegalArgument("cell occupied".into()));
        }

        game.board[row][col] = Some(mark);
        game.last_move = Some(LastMove {
            by: player.to_string(),
            row,
            col,
        });

        if let Some(winning_mark) = winner(&game.board) {
            game.status = if winning_mark == Mark::X {
                GameStatus::WonX
            } else {
                GameStatus::WonO
            };
            game.winner = Some(game.player_for(winning_mark).to_string());
            game.current_turn = None;
        } else if board_full(&game.board) {
            game.status = GameStatus::Draw;
            game.current_turn = None;
        } else {
            game.current_turn = Some(other_mark(mark));
        }

        let snapshot = game.clone();
        let finished = snapshot.status != GameStatus::InProgress;
        if finished {
            games.remove(&game_id);
            let mut active = self.active_by_user.write();
            active.remove(&snapshot.player_x);
            active.remove(&snapshot.player_o);
        }
        drop(games);

        self.push("TICTACTOE_UPDATE", &snapshot);
        Ok(snapshot)
    }

    pub fn resign(&self, game_id: u64, player: &str) -> Result<Game, GameError> {
        let mut games = self.games.write();
        let game = games.get_mut(&game_id).ok_or(GameError::NotFound)?;

        let mark = game
            .mark_of(player)
            .ok_or_else(|| GameError::IllegalArgument("not a participant".into()))?;
        if game.status != GameStatus::InProgress {
            return Err(GameError::IllegalState("game is finished".into()));
        }

        game.status = GameStatus::Resigned;
        game.winner = Some(game.player_for(other_mark(mark)).to_string());
        game.current_turn = None;

        let snapshot = game.clone();
        games.remove(&game_id);
        let mut active = self.active_by_user.write();
        active.remove(&snapshot.player_x);
        active.remove(&snapshot.player_o);
        drop(active);
        drop(games);

        self.push("TICTACTOE_RESIGN", &snapshot);
        Ok(snapshot)
    }

    pub fn current_for(&self, user: &str) -> Option<Game> {
        let id = *self.active_by_user.read().get(user)?;
        self.games.read().get(&id).cloned()
    }

    fn push(&self, event: &str, game: &Game) {
        let turn = game
            .current_turn
            .map(|m| format!("{m:?}"))
            .unwrap_or_else(|| "null".to_string());
        let winner = game.winner.clone().unwrap_or_else(|| "null".to_string());
        let line = format!("{event}:{}:{:?}:{turn}:{winner}", game.id, game.status);
        self.broadcaster.send_to(&game.player_x, &line);
        self.broadcaster.send_to(&game.player_o, &line);
    }
}

fn other_mark(mark: Mark) -> Mark {
    match mark {
        Mark::X => Mark::O,
        Mark::O => Mark::X,
    }
}

fn winner(board: &[[Option<Mark>; 3]; 3]) -> Option<Mark> {
    for line in LINES {
        let marks: Vec<Option<Mark>> = line.iter().map(|&(r, c)| board[r][c]).collect();
        if let Some(first) = marks[0] {
            if marks.iter().all(|m| *m == Some(first)) {
                return Some(first);
            }
        }
    }
    None
}

fn board_full(board: &[[Option<Mark>; 3]; 3]) -> bool {
    board.iter().flatten().all(|cell| cell.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::null_broadcaster;
    use crate::presence::Anchor;
    use std::net::{IpAddr, Ipv4Addr};

    fn engine() -> TicTacToeEngine {
        let presence = Arc::new(PresenceRegistry::new());
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        presence.login("alice", ip, None, None, false, Anchor::Http(1));
        presence.login("bob", ip, None, None, false, Anchor::Http(2));
        TicTacToeEngine::new(presence, null_broadcaster())
    }

    #[test]
    fn x_moves_first_and_wins_top_row() {
        let e = engine();
        let game = e.start("alice", "bob").unwrap();
        assert_eq!(game.current_turn, Some(Mark::X));

        e.make_move(game.id, "alice", 0, 0).unwrap();
        e.make_move(game.id, "bob", 1, 0).unwrap();
        e.make_move(game.id, "alice", 0, 1).unwrap();
        e.make_move(game.id, "bob", 1, 1).unwrap();
        let won = e.make_move(game.id, "alice", 0, 2).unwrap();

        assert_eq!(won.status, GameStatus::WonX);
        assert_eq!(won.winner.as_deref(), Some("alice"));
        assert!(won.current_turn.is_none());
        assert!(e.current_for("alice").is_none());
    }

    #[test]
    fn rejects_out_of_turn_move() {
        let e = engine();
        let game = e.start("alice", "bob").unwrap();
        assert!(matches!(
            e.make_move(game.id, "bob", 0, 0),
            Err(GameError::IllegalState(_))
        ));
    }

    #[test]
    fn draw_has_no_winner() {
        let e = engine();
        let game = e.start("alice", "bob").unwrap();
        // X O X / X O O / O X X -> draw
        let moves = [
            ("alice", 0, 0),
            ("bob", 0, 1),
            ("alice", 0, 2),
            ("bob", 1, 1),
            ("alice", 1, 0),
            ("bob", 1, 2),
            ("alice", 2, 1),
            ("bob", 2, 0),
            ("alice", 2, 2),
        ];
        let mut last = game;
        for (player, row, col) in moves {
            last = e.make_move(last.id, player, row, col).unwrap();
        }
        assert_eq!(last.status, GameStatus::Draw);
        assert!(last.winner.is_none());
    }
}
