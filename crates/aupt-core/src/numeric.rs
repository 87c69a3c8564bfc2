pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let rem = a % b;
        a = b;
        b = rem;
    }
    a
}

pub(crate) fn is_prime(value: u64) -> bool {
    if value < 2 {
        return false;
    }
    if value % 2 == 0 {
        return value == 2;
    }
    let mut divisor = 3u64;
    while divisor.saturating_mul(divisor) <= value {
        if value % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

/// Smallest prime strictly greater than `n`. Such a prime shares no factor
/// with `n`, so it is always a valid permutation multiplier.
pub(crate) fn smallest_prime_above(n: u64) -> u64 {
    let mut candidate = n.saturating_add(1);
    while !is_prime(candidate) {
        candidate = candidate.saturating_add(1);
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_handles_zero_and_order() {
        assert_eq!(gcd(10, 15), 5);
        assert_eq!(gcd(15, 10), 5);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(9, 28), 1);
    }

    #[test]
    fn prime_fallback_is_coprime() {
        assert_eq!(smallest_prime_above(0), 2);
        assert_eq!(smallest_prime_above(7), 11);
        assert_eq!(smallest_prime_above(13), 17);
        for n in 2..200u64 {
            assert_eq!(gcd(smallest_prime_above(n), n), 1, "n = {n}");
        }
    }
}
