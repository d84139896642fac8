use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use crate::token::Token;

/// Ordered set of deadlines.
///
/// A binary min-heap of `(deadline, generation, token)` plus a side table
/// mapping each token to its current generation and deadline. A heap entry
/// is valid only while the side table still agrees with its generation;
/// `start`ing the same timer again bumps the generation, and `stop`ping it
/// drops the side-table row, so earlier entries become *stale* and are
/// discarded lazily on pop rather than hunted down and removed from the
/// heap.
pub struct TimerSet {
    heap: BinaryHeap<Reverse<(Instant, u64, Token)>>,
    table: HashMap<Token, (u64, Instant)>,
}

impl TimerSet {
    pub fn new() -> TimerSet {
        TimerSet {
            heap: BinaryHeap::new(),
            table: HashMap::new(),
        }
    }

    fn clean_top(&mut self) {
        while let Some(&Reverse((_, gen, token))) = self.heap.peek() {
            match self.table.get(&token) {
                Some(&(g, _)) if g == gen => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    fn earliest(&mut self) -> Option<Instant> {
        self.clean_top();
        self.heap.peek().map(|&Reverse((deadline, _, _))| deadline)
    }

    /// Schedule `token` to fire at `deadline`, replacing any prior schedule
    /// for the same token. Returns whether this is now the earliest
    /// deadline in the set.
    pub fn add(&mut self, deadline: Instant, token: Token) -> bool {
        let before = self.earliest();

        let gen = self.table.get(&token).map(|&(g, _)| g + 1).unwrap_or(0);
        self.table.insert(token, (gen, deadline));
        self.heap.push(Reverse((deadline, gen, token)));

        match before {
            None => true,
            Some(b) => deadline < b,
        }
    }

    /// Cancel `token`'s scheduled deadline, if any. Returns whether the
    /// token was the earliest deadline before removal.
    pub fn remove(&mut self, token: Token) -> bool {
        let was_earliest = self
            .heap_top_token()
            .map(|top| top == token)
            .unwrap_or(false);

        self.table.remove(&token);
        was_earliest
    }

    fn heap_top_token(&mut self) -> Option<Token> {
        self.clean_top();
        self.heap.peek().map(|&Reverse((_, _, token))| token)
    }

    /// Milliseconds until the next expiry, or `-1` if the set is empty.
    pub fn timeout(&mut self) -> i64 {
        match self.earliest() {
            None => -1,
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    0
                } else {
                    (deadline - now).as_millis().min(i64::MAX as u128) as i64
                }
            }
        }
    }

    /// Pop one expired token, if any deadline has passed.
    pub fn event(&mut self) -> Option<Token> {
        self.clean_top();

        let expired = matches!(
            self.heap.peek(),
            Some(&Reverse((deadline, _, _))) if deadline <= Instant::now()
        );

        if !expired {
            return None;
        }

        let Reverse((_, _, token)) = self.heap.pop()?;
        self.table.remove(&token);
        Some(token)
    }
}

#[cfg(test)]
mod test {
    use super::TimerSet;
    use crate::token::Token;
    use std::time::{Duration, Instant};

    #[test]
    fn add_reports_earliest_change() {
        let mut set = TimerSet::new();
        let now = Instant::now();

        assert!(set.add(now + Duration::from_millis(30), Token(0)));
        assert!(set.add(now + Duration::from_millis(10), Token(1)));
        assert!(!set.add(now + Duration::from_millis(20), Token(2)));
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut set = TimerSet::new();
        let now = Instant::now();

        set.add(now + Duration::from_millis(30), Token(0));
        set.add(now + Duration::from_millis(10), Token(1));
        set.add(now + Duration::from_millis(20), Token(2));

        std::thread::sleep(Duration::from_millis(35));

        assert_eq!(set.event(), Some(Token(1)));
        assert_eq!(set.event(), Some(Token(2)));
        assert_eq!(set.event(), Some(Token(0)));
        assert_eq!(set.event(), None);
    }

    #[test]
    fn remove_reports_was_first_and_drops_stale_entry() {
        let mut set = TimerSet::new();
        let now = Instant::now();

        set.add(now + Duration::from_millis(10), Token(0));
        set.add(now + Duration::from_millis(20), Token(1));

        assert!(set.remove(Token(0)));
        assert!(set.remove(Token(1)));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(set.event(), None);
    }

    #[test]
    fn restart_bumps_generation_and_invalidates_old_entry() {
        let mut set = TimerSet::new();
        let now = Instant::now();

        set.add(now + Duration::from_millis(5), Token(0));
        set.add(now + Duration::from_millis(50), Token(0));

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(set.event(), None);

        std::thread::sleep(Duration::from_millis(45));
        assert_eq!(set.event(), Some(Token(0)));
    }
}
