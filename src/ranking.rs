//! Competitive ranking over one page of a challenge leaderboard.

/// Assign ranks to one page of progress values already sorted descending.
///
/// Competition ranking: equal progress shares the rank of the first member
/// of the tie run, and the next distinct value's rank is its absolute
/// position (`offset + index + 1`), so `[80, 80, 60]` at offset 0 ranks
/// `[1, 1, 3]`.  The counter is seeded at `offset + 1`; ties that span a
/// page boundary are not reconciled against the previous page.
pub fn assign_ranks(progresses: &[i64], offset: i64) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(progresses.len());
    let mut last_progress: Option<i64> = None;
    let mut last_rank = offset;

    for (i, &progress) in progresses.iter().enumerate() {
        let rank = match last_progress {
            Some(prev) if prev == progress => last_rank,
            _ => offset + i as i64 + 1,
        };
        last_progress = Some(progress);
        last_rank = rank;
        ranks.push(rank);
    }

    ranks
}
