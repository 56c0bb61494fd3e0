//! Clan-hall auction engine (C7): sealed-increment bidding with partial top-up, a cancellation
//! fee, and a cached leader kept consistent across one critical section per bid.

use crate::error::AuctionError;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct Bidder {
    pub bid_at_nanos: i64,
    pub max_bid: i64,
    pub cur_bid: i64,
}

struct AuctionInner {
    bidders: HashMap<i32, Bidder>,
    highest_clan_id: i32,
    highest_bid: i64,
}

/// One hall's sealed-increment auction. All bid/cancel/end operations run under a single
/// mutex so validate -> mutate -> leader-update is one critical section (§4.7, §5).
pub struct Auction {
    pub id: i32,
    pub hall_id: i32,
    pub starting_bid: i64,
    pub end_date_nanos: i64,
    inner: Mutex<AuctionInner>,
}

impl Auction {
    pub fn new(id: i32, hall_id: i32, starting_bid: i64, end_date_nanos: i64) -> Self {
        Auction {
            id,
            hall_id,
            starting_bid,
            end_date_nanos,
            inner: Mutex::new(AuctionInner { bidders: HashMap::new(), highest_clan_id: 0, highest_bid: 0 }),
        }
    }

    fn is_closed(&self, now_nanos: i64) -> bool {
        now_nanos >= self.end_date_nanos
    }

    /// Places or raises a bid. Returns the amount to deduct from the clan's treasury: the full
    /// `amount` for a new bidder, or only the delta above their previous `max_bid` (§4.7).
    pub fn place_bid(&self, clan_id: i32, amount: i64, now_nanos: i64) -> Result<i64, AuctionError> {
        if self.is_closed(now_nanos) {
            return Err(AuctionError::AuctionClosed(self.id));
        }
        let mut inner = self.inner.lock();
        let min_bid = if inner.highest_bid == 0 { self.starting_bid } else { inner.highest_bid + 1 };
        if amount < min_bid {
            return Err(AuctionError::BidTooLow { amount, min: min_bid });
        }

        let deduct = if let Some(existing) = inner.bidders.get(&clan_id).copied() {
            if amount <= existing.max_bid {
                return Err(AuctionError::BidTooLow { amount, min: existing.max_bid + 1 });
            }
            let deduct = amount - existing.max_bid;
            inner.bidders.insert(clan_id, Bidder { bid_at_nanos: now_nanos, max_bid: amount, cur_bid: amount });
            deduct
        } else {
            inner.bidders.insert(clan_id, Bidder { bid_at_nanos: now_nanos, max_bid: amount, cur_bid: amount });
            amount
        };

        if amount > inner.highest_bid {
            inner.highest_bid = amount;
            inner.highest_clan_id = clan_id;
        }
        Ok(deduct)
    }

    /// Cancels `clan_id`'s bid, returning the refund (curBid minus a 10% fee), and recomputes
    /// the cached leader by a linear scan (§4.7, §9 — acceptable given small bidder counts).
    pub fn cancel_bid(&self, clan_id: i32) -> Result<i64, AuctionError> {
        let mut inner = self.inner.lock();
        let bidder = inner.bidders.remove(&clan_id).ok_or(AuctionError::NoBid(clan_id))?;
        let refund = bidder.cur_bid - (bidder.cur_bid * 10 / 100);

        let (leader_id, leader_bid) = inner
            .bidders
            .iter()
            .max_by_key(|(_, b)| b.max_bid)
            .map(|(&id, b)| (id, b.max_bid))
            .unwrap_or((0, 0));
        inner.highest_clan_id = leader_id;
        inner.highest_bid = leader_bid;

        Ok(refund)
    }

    /// Cached `(clanID, bidAmount)`; `(0, 0)` when there are no bidders.
    pub fn highest_bidder(&self) -> (i32, i64) {
        let inner = self.inner.lock();
        (inner.highest_clan_id, inner.highest_bid)
    }

    pub fn bidder_count(&self) -> usize {
        self.inner.lock().bidders.len()
    }

    pub fn bidder(&self, clan_id: i32) -> Option<Bidder> {
        self.inner.lock().bidders.get(&clan_id).copied()
    }

    /// `(winnerClanID, winningBid)`, or `(0, 0)` if nobody bid (§4.7).
    pub fn end_auction(&self) -> (i32, i64) {
        self.highest_bidder()
    }

    /// Snapshot of every non-winning bidder, for the caller to refund (§4.7).
    pub fn loser_bids(&self) -> Vec<(i32, Bidder)> {
        let inner = self.inner.lock();
        inner
            .bidders
            .iter()
            .filter(|(&id, _)| id != inner.highest_clan_id)
            .map(|(&id, &b)| (id, b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn three_clan_race_scenario() {
        let auction = Auction::new(1, 22, 100, i64::MAX);
        auction.place_bid(10, 100, 0).unwrap();
        auction.place_bid(20, 200, 0).unwrap();
        auction.place_bid(30, 500, 0).unwrap();
        assert_eq!(auction.highest_bidder(), (30, 500));

        let refund = auction.cancel_bid(30).unwrap();
        assert_eq!(refund, 450);
        assert_eq!(auction.highest_bidder(), (20, 200));
        assert_eq!(auction.bidder_count(), 2);

        assert_eq!(auction.end_auction(), (20, 200));
    }

    #[test]
    fn cancel_fee_is_ten_percent_floor() {
        let auction = Auction::new(1, 22, 1, i64::MAX);
        auction.place_bid(1, 999, 0).unwrap();
        let refund = auction.cancel_bid(1).unwrap();
        assert_eq!(refund, 999 - (999 * 10 / 100));
    }

    #[test]
    fn bid_too_low_rejected() {
        let auction = Auction::new(1, 22, 100, i64::MAX);
        assert!(auction.place_bid(1, 50, 0).is_err());
        auction.place_bid(1, 100, 0).unwrap();
        assert!(auction.place_bid(2, 100, 0).is_err());
    }

    #[test]
    fn closed_auction_rejects_bids() {
        let auction = Auction::new(1, 22, 100, 1000);
        assert!(auction.place_bid(1, 100, 2000).is_err());
    }

    #[test]
    fn partial_top_up_deducts_only_delta() {
        let auction = Auction::new(1, 22, 100, i64::MAX);
        let first = auction.place_bid(1, 200, 0).unwrap();
        assert_eq!(first, 200);
        let second = auction.place_bid(1, 350, 0).unwrap();
        assert_eq!(second, 150);
        assert_eq!(auction.bidder(1).unwrap().max_bid, 350);
    }

    #[test]
    fn concurrent_bids_preserve_leader_invariant() {
        let auction = Arc::new(Auction::new(1, 22, 10, i64::MAX));
        let mut handles = Vec::new();
        for clan_id in 1..=20 {
            let auction = auction.clone();
            handles.push(thread::spawn(move || {
                let _ = auction.place_bid(clan_id, 100 + clan_id as i64, 0);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let (leader, bid) = auction.highest_bidder();
        let inner_max = (1..=20i32).map(|id| 100 + id as i64).max().unwrap();
        assert_eq!(bid, inner_max);
        assert_eq!(leader, 20);
    }
}
