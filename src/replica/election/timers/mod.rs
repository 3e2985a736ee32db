mod election_timer;
mod leader_timer;
mod signals;
mod time;

#[cfg(test)]
mod test_utils;

pub(super) use election_timer::ElectionTimerHandle;
pub(super) use leader_timer::LeaderTimerHandle;
