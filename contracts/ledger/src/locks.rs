use incentives_shared::{aggregation_bucket, EarningEntry, LockEntry};
use soroban_sdk::Vec;

/// First position whose unlock time is strictly after `unlock_time`.
fn insert_index(len: u32, unlock_time: u64, time_at: impl Fn(u32) -> u64) -> u32 {
    let (mut low, mut high) = (0u32, len);
    while low < high {
        let mid = (low + high) / 2;
        if time_at(mid) <= unlock_time {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

/// Reward weight carried by a lock.
pub fn lock_weight(entry: &LockEntry) -> i128 {
    entry.amount * entry.multiplier
}

/// Add principal locked at `now` to `locks`, merging into the most recent
/// entry of the same multiplier when both unlock in the same aggregation
/// bucket and that entry is still running.
///
/// Returns true when the amount was merged.
pub fn add_lock(
    locks: &mut Vec<LockEntry>,
    amount: i128,
    multiplier: i128,
    now: u64,
    unlock_time: u64,
) -> bool {
    let mut i = locks.len();
    while i > 0 {
        i -= 1;
        let Some(mut entry) = locks.get(i) else {
            break;
        };
        if entry.multiplier != multiplier {
            continue;
        }
        if entry.unlock_time > now
            && aggregation_bucket(entry.unlock_time) == aggregation_bucket(unlock_time)
        {
            entry.amount += amount;
            entry.lock_time = entry.lock_time.max(now);
            locks.set(i, entry);
            return true;
        }
        break;
    }

    let index = insert_index(locks.len(), unlock_time, |i| {
        locks.get(i).map_or(u64::MAX, |e| e.unlock_time)
    });
    locks.insert(
        index,
        LockEntry {
            amount,
            multiplier,
            lock_time: now,
            unlock_time,
        },
    );
    false
}

/// Add a vesting amount, merging into the latest entry of the same bucket.
pub fn add_earning(earnings: &mut Vec<EarningEntry>, amount: i128, unlock_time: u64) -> bool {
    if let Some(mut last) = earnings.last() {
        if aggregation_bucket(last.unlock_time) == aggregation_bucket(unlock_time) {
            last.amount += amount;
            earnings.set(earnings.len() - 1, last);
            return true;
        }
    }

    let index = insert_index(earnings.len(), unlock_time, |i| {
        earnings.get(i).map_or(u64::MAX, |e| e.unlock_time)
    });
    earnings.insert(index, EarningEntry { amount, unlock_time });
    false
}

/// Pop matured locks oldest-first, at most `limit` of them (0 = no limit).
///
/// Returns the released amount and the reward weight it carried.
pub fn take_expired(locks: &mut Vec<LockEntry>, now: u64, limit: u32) -> (i128, i128) {
    let mut amount = 0i128;
    let mut weight = 0i128;
    let mut taken = 0u32;
    while let Some(first) = locks.first() {
        if first.unlock_time > now || (limit != 0 && taken == limit) {
            break;
        }
        locks.pop_front();
        amount += first.amount;
        weight += lock_weight(&first);
        taken += 1;
    }
    (amount, weight)
}

/// Sum of locks that have matured by `now`.
pub fn matured_amount(locks: &Vec<LockEntry>, now: u64) -> i128 {
    locks
        .iter()
        .filter(|e| e.unlock_time <= now)
        .map(|e| e.amount)
        .sum()
}

/// Sum of locks still running at `now`.
pub fn unexpired_amount(locks: &Vec<LockEntry>, now: u64) -> i128 {
    locks
        .iter()
        .filter(|e| e.unlock_time > now)
        .map(|e| e.amount)
        .sum()
}

/// Index of the earning entry unlocking exactly at `unlock_time`.
pub fn find_earning(earnings: &Vec<EarningEntry>, unlock_time: u64) -> Option<u32> {
    for (i, entry) in earnings.iter().enumerate() {
        if entry.unlock_time == unlock_time {
            return Some(i as u32);
        }
        if entry.unlock_time > unlock_time {
            break;
        }
    }
    None
}
