//! Pre/N clock divider search. The SPI clock generator divides the base clock
//! by a prescaler (`pre`, 1..=8192) and a counter (`n`, 1..=64); the counter
//! also carries the duty cycle, so for equal error a larger `n` is preferred.

/// APB clock feeding the SPI hosts.
pub const APB_CLK_HZ: u32 = 80_000_000;
pub const MAX_PRE: u32 = 8192;
pub const MAX_N: u32 = 64;
pub const DEFAULT_DUTY_CYCLE: u16 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClockDivider {
    pre: u16,
    n: u8,
    high: u8,
}

impl ClockDivider {
    /// Undivided base clock, used for requests above 3/4 of the base rate.
    pub const PASSTHROUGH: ClockDivider = ClockDivider {
        pre: 1,
        n: 1,
        high: 1,
    };

    pub fn solve(base_hz: u32, requested_hz: u32) -> Self {
        Self::solve_with_duty(base_hz, requested_hz, DEFAULT_DUTY_CYCLE)
    }

    /// Returns the divider whose achieved rate is closest to `requested_hz`.
    /// Unreachable rates clamp to the nearest reachable one; no error is raised.
    pub fn solve_with_duty(base_hz: u32, requested_hz: u32, duty_cycle: u16) -> Self {
        let base = base_hz as u64;
        let hz = requested_hz.max(1) as u64;
        if hz > (base / 4) * 3 {
            return Self::PASSTHROUGH;
        }

        let mut best: Option<(u64, u64, u64)> = None;
        for n in 2..=MAX_N as u64 {
            let pre = ((base / n) + hz / 2) / hz;
            let pre = pre.clamp(1, MAX_PRE as u64);
            let err = achieved(base, pre, n).abs_diff(hz);
            // `<=` keeps the last (largest) n among equal errors.
            if best.is_none_or(|(_, _, best_err)| err <= best_err) {
                best = Some((pre, n, err));
            }
        }

        let (pre, n, _) = best.unwrap_or((1, 2, 0));
        let high = ((duty_cycle as u64 * n + 127) / 256).max(1);
        Self {
            pre: pre as u16,
            n: n as u8,
            high: high.min(n) as u8,
        }
    }

    #[inline(always)]
    pub fn pre(&self) -> u32 {
        self.pre as u32
    }

    #[inline(always)]
    pub fn n(&self) -> u32 {
        self.n as u32
    }

    /// Counter ticks the clock line stays high within one period of `n` ticks.
    #[inline(always)]
    pub fn high_ticks(&self) -> u32 {
        self.high as u32
    }

    #[inline(always)]
    pub fn is_passthrough(&self) -> bool {
        *self == Self::PASSTHROUGH
    }

    pub fn frequency(&self, base_hz: u32) -> u32 {
        achieved(base_hz as u64, self.pre as u64, self.n as u64) as u32
    }
}

#[inline(always)]
fn achieved(base: u64, pre: u64, n: u64) -> u64 {
    base / (pre * n)
}
