//! Component A — clocks and calendar-based timer scheduling.
//!
//! Two clocks back the loop: a monotonic microsecond counter used for all
//! relative scheduling (`now_us`), and a wall-clock millisecond reading used
//! to rebase the monotonic counter when the system clock jumps (see
//! `evloop::Loop::update_time`).

use std::time::Duration;

pub fn now_us() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

pub fn now_ms() -> u64 {
    now_us() / 1_000
}

/// Wall-clock milliseconds since the epoch, used only to detect clock skew.
pub fn wall_ms() -> u64 {
    let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
    unsafe {
        libc::gettimeofday(&mut tv, std::ptr::null_mut());
    }
    tv.tv_sec as u64 * 1_000 + tv.tv_usec as u64 / 1_000
}

pub fn sleep(d: Duration) {
    std::thread::sleep(d);
}

/// Next unix-second timestamp strictly greater than `now` matching the
/// given cron fields. Negative fields are wildcards.
///
/// ```text
/// minute   hour    day     week    month       example
/// 0~59     0~23    1~31    0~6     1~12
///  30      -1      -1      -1      -1          every hour at :30
///  30      1       -1      -1      -1          daily at 01:30
///  30      1       15      -1      -1          monthly on the 15th
///  30      1       -1       0      -1          weekly on Sunday
///  30      1        1      -1      10          yearly on Oct 1
/// ```
/// `week` takes priority over `day`/`month` when it is set, matching the
/// original implementation's precedence.
pub fn cron_next(minute: i32, hour: i32, day: i32, week: i32, month: i32) -> i64 {
    let now = unsafe { libc::time(std::ptr::null_mut()) };
    let mut tm = to_tm_local(now);

    // Walk forward minute-by-minute (fast enough: at most ~a year of
    // minutes, and in practice the match is usually within a day) until
    // every constrained field lines up and the candidate is > now.
    // Start from a clean minute boundary.
    tm.tm_sec = 0;

    loop {
        advance_minute(&mut tm);

        if minute >= 0 && tm.tm_min != minute {
            continue;
        }
        if hour >= 0 && tm.tm_hour != hour {
            continue;
        }
        if week >= 0 {
            if tm.tm_wday != week {
                continue;
            }
        } else {
            if day >= 0 && tm.tm_mday != day {
                continue;
            }
            if month >= 0 && tm.tm_mon + 1 != month {
                continue;
            }
        }

        let candidate = mktime_local(&mut tm);
        if candidate > now {
            return candidate as i64;
        }
    }
}

fn advance_minute(tm: &mut libc::tm) {
    tm.tm_min += 1;
    let _ = mktime_local(tm);
}

fn to_tm_local(t: libc::time_t) -> libc::tm {
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe {
        libc::localtime_r(&t, &mut tm);
    }
    tm
}

fn mktime_local(tm: &mut libc::tm) -> libc::time_t {
    unsafe { libc::mktime(tm) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_cron_is_in_the_future() {
        let next = cron_next(30, -1, -1, -1, -1);
        assert!(next as u64 > wall_ms() / 1000);
    }

    #[test]
    fn monotonic_clock_is_nondecreasing() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }
}
