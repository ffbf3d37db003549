//! Multi-party promise combinators.
//!
//! Synchronization points over several promises: `all*` waits for every
//! input, `any` forwards the first resolution verbatim, `any_success`
//! prefers the first success and synthesizes an aggregate failure only
//! once every input has reported failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::OpError;
use crate::promise::Promise;

/// Resolves with the pair of both success values once both inputs succeed,
/// or with the first observed failure as soon as either input fails.
/// Outcomes of the other input arriving after a failure are ignored.
pub fn all2<A, B>(first: &Promise<A>, second: &Promise<B>) -> Promise<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    let merged = Promise::new();
    let slots = Arc::new(Mutex::new((None::<A>, None::<B>)));

    {
        let merged = merged.clone();
        let slots = Arc::clone(&slots);
        first.on_resolved(move |outcome| match outcome {
            Ok(value) => {
                let mut held = slots.lock().unwrap_or_else(|p| p.into_inner());
                held.0 = Some(value.clone());
                if let (Some(a), Some(b)) = (&held.0, &held.1) {
                    merged.ok((a.clone(), b.clone()));
                }
            }
            Err(error) => {
                merged.fail(error.clone());
            }
        });
    }
    {
        let merged = merged.clone();
        let slots = Arc::clone(&slots);
        second.on_resolved(move |outcome| match outcome {
            Ok(value) => {
                let mut held = slots.lock().unwrap_or_else(|p| p.into_inner());
                held.1 = Some(value.clone());
                if let (Some(a), Some(b)) = (&held.0, &held.1) {
                    merged.ok((a.clone(), b.clone()));
                }
            }
            Err(error) => {
                merged.fail(error.clone());
            }
        });
    }

    merged
}

/// Three-way variant of [`all2`].
pub fn all3<A, B, C>(first: &Promise<A>, second: &Promise<B>, third: &Promise<C>) -> Promise<(A, B, C)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    all2(&all2(first, second), third).map(|((a, b), c)| (a, b, c))
}

// Higher arities fold onto the previous one and flatten the tuple, so the
// failure semantics stay exactly those of `all2`.

pub fn all4<A, B, C, D>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
) -> Promise<(A, B, C, D)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
{
    all2(&all3(a, b, c), d).map(|((a, b, c), d)| (a, b, c, d))
}

pub fn all5<A, B, C, D, E>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
    e: &Promise<E>,
) -> Promise<(A, B, C, D, E)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    all2(&all4(a, b, c, d), e).map(|((a, b, c, d), e)| (a, b, c, d, e))
}

pub fn all6<A, B, C, D, E, F>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
    e: &Promise<E>,
    f: &Promise<F>,
) -> Promise<(A, B, C, D, E, F)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Clone + Send + 'static,
{
    all2(&all5(a, b, c, d, e), f).map(|((a, b, c, d, e), f)| (a, b, c, d, e, f))
}

pub fn all7<A, B, C, D, E, F, G>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
    e: &Promise<E>,
    f: &Promise<F>,
    g: &Promise<G>,
) -> Promise<(A, B, C, D, E, F, G)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Clone + Send + 'static,
    G: Clone + Send + 'static,
{
    all2(&all6(a, b, c, d, e, f), g).map(|((a, b, c, d, e, f), g)| (a, b, c, d, e, f, g))
}

pub fn all8<A, B, C, D, E, F, G, H>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
    e: &Promise<E>,
    f: &Promise<F>,
    g: &Promise<G>,
    h: &Promise<H>,
) -> Promise<(A, B, C, D, E, F, G, H)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Clone + Send + 'static,
    G: Clone + Send + 'static,
    H: Clone + Send + 'static,
{
    all2(&all7(a, b, c, d, e, f, g), h)
        .map(|((a, b, c, d, e, f, g), h)| (a, b, c, d, e, f, g, h))
}

pub fn all9<A, B, C, D, E, F, G, H, I>(
    a: &Promise<A>,
    b: &Promise<B>,
    c: &Promise<C>,
    d: &Promise<D>,
    e: &Promise<E>,
    f: &Promise<F>,
    g: &Promise<G>,
    h: &Promise<H>,
    i: &Promise<I>,
) -> Promise<(A, B, C, D, E, F, G, H, I)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    D: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Clone + Send + 'static,
    G: Clone + Send + 'static,
    H: Clone + Send + 'static,
    I: Clone + Send + 'static,
{
    all2(&all8(a, b, c, d, e, f, g, h), i)
        .map(|((a, b, c, d, e, f, g, h), i)| (a, b, c, d, e, f, g, h, i))
}

/// Homogeneous join: resolves with every success value in input order, or
/// with the first observed failure. An empty input resolves immediately
/// with an empty vector.
pub fn all_vec<T>(promises: &[Promise<T>]) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let merged = Promise::new();
    if promises.is_empty() {
        merged.ok(Vec::new());
        return merged;
    }

    let slots: Arc<Mutex<(Vec<Option<T>>, usize)>> =
        Arc::new(Mutex::new((vec![None; promises.len()], promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let merged = merged.clone();
        let slots = Arc::clone(&slots);
        promise.on_resolved(move |outcome| match outcome {
            Ok(value) => {
                let mut held = slots.lock().unwrap_or_else(|p| p.into_inner());
                held.0[index] = Some(value.clone());
                held.1 -= 1;
                if held.1 == 0 {
                    merged.ok(held.0.iter_mut().filter_map(|slot| slot.take()).collect());
                }
            }
            Err(error) => {
                merged.fail(error.clone());
            }
        });
    }

    merged
}

/// Forwards whichever input resolves first, success or failure, verbatim.
pub fn any<T>(promises: &[Promise<T>]) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let merged = Promise::new();
    for promise in promises {
        let merged = merged.clone();
        promise.on_resolved(move |outcome| {
            merged.resolve(outcome.clone());
        });
    }
    merged
}

/// Resolves with the first success among the inputs. If every input fails,
/// resolves with [`OpError::AllFailed`] once the last failure is in.
pub fn any_success<T>(promises: &[Promise<T>]) -> Promise<T>
where
    T: Clone + Send + 'static,
{
    let merged = Promise::new();
    if promises.is_empty() {
        merged.fail(OpError::AllFailed);
        return merged;
    }

    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    for promise in promises {
        let merged = merged.clone();
        let remaining = Arc::clone(&remaining);
        promise.on_resolved(move |outcome| {
            if let Ok(value) = outcome {
                merged.ok(value.clone());
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                // Last input reported; a no-op if a success got there first.
                merged.fail(OpError::AllFailed);
            }
        });
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all2_pairs_both_successes() {
        let first: Promise<u32> = Promise::new();
        let second: Promise<u32> = Promise::new();
        let merged = all2(&first, &second);

        first.ok(1);
        assert!(!merged.is_resolved());
        second.ok(2);

        assert_eq!(merged.value(), Some(Ok((1, 2))));
    }

    #[test]
    fn all2_first_failure_wins_over_later_success() {
        let first: Promise<u32> = Promise::new();
        let second: Promise<u32> = Promise::new();
        let merged = all2(&first, &second);

        second.fail(OpError::Os(libc::EIO));
        first.ok(1);

        assert_eq!(merged.value(), Some(Err(OpError::Os(libc::EIO))));
    }

    #[test]
    fn all5_flattens_the_tuple() {
        let a: Promise<u32> = Promise::resolved(Ok(1));
        let b: Promise<&'static str> = Promise::resolved(Ok("two"));
        let c: Promise<u32> = Promise::new();
        let d: Promise<bool> = Promise::resolved(Ok(true));
        let e: Promise<u32> = Promise::resolved(Ok(5));
        let merged = all5(&a, &b, &c, &d, &e);

        assert!(!merged.is_resolved());
        c.ok(3);

        assert_eq!(merged.value(), Some(Ok((1, "two", 3, true, 5))));
    }

    #[test]
    fn all9_carries_a_failure_from_any_position() {
        let inputs: Vec<Promise<u32>> = (0..9).map(|_| Promise::new()).collect();
        let merged = all9(
            &inputs[0], &inputs[1], &inputs[2], &inputs[3], &inputs[4], &inputs[5], &inputs[6],
            &inputs[7], &inputs[8],
        );

        for (i, input) in inputs.iter().enumerate() {
            if i == 6 {
                input.fail(OpError::Os(libc::EIO));
            } else {
                input.ok(i as u32);
            }
        }

        assert_eq!(merged.value(), Some(Err(OpError::Os(libc::EIO))));
    }

    #[test]
    fn all_vec_keeps_input_order_regardless_of_resolution_order() {
        let inputs: Vec<Promise<u32>> = (0..4).map(|_| Promise::new()).collect();
        let merged = all_vec(&inputs);

        inputs[3].ok(3);
        inputs[0].ok(0);
        inputs[2].ok(2);
        assert!(!merged.is_resolved());
        inputs[1].ok(1);

        assert_eq!(merged.value(), Some(Ok(vec![0, 1, 2, 3])));
    }

    #[test]
    fn all_vec_fails_fast_and_empty_input_is_vacuous() {
        let inputs: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
        let merged = all_vec(&inputs);

        inputs[1].fail(OpError::Os(libc::ENOENT));
        assert_eq!(merged.value(), Some(Err(OpError::Os(libc::ENOENT))));

        let none: Vec<Promise<u32>> = Vec::new();
        assert_eq!(all_vec(&none).value(), Some(Ok(Vec::new())));
    }

    #[test]
    fn all3_flattens_the_tuple() {
        let a: Promise<u32> = Promise::resolved(Ok(1));
        let b: Promise<&'static str> = Promise::resolved(Ok("two"));
        let c: Promise<u32> = Promise::resolved(Ok(3));

        assert_eq!(all3(&a, &b, &c).value(), Some(Ok((1, "two", 3))));
    }

    #[test]
    fn any_forwards_first_resolution_verbatim() {
        let inputs: Vec<Promise<u32>> = vec![Promise::new(), Promise::new()];
        let merged = any(&inputs);

        inputs[1].fail(OpError::Os(libc::ECONNREFUSED));
        inputs[0].ok(9);

        assert_eq!(merged.value(), Some(Err(OpError::Os(libc::ECONNREFUSED))));
    }

    #[test]
    fn any_success_prefers_success_over_earlier_failure() {
        let inputs: Vec<Promise<u32>> = vec![Promise::new(), Promise::new()];
        let merged = any_success(&inputs);

        inputs[0].fail(OpError::Os(libc::EIO));
        assert!(!merged.is_resolved());
        inputs[1].ok(4);

        assert_eq!(merged.value(), Some(Ok(4)));
    }

    #[test]
    fn any_success_aggregates_when_all_fail() {
        let inputs: Vec<Promise<u32>> = vec![Promise::new(), Promise::new()];
        let merged = any_success(&inputs);

        inputs[0].fail(OpError::Os(libc::EIO));
        inputs[1].fail(OpError::Os(libc::ENOENT));

        assert_eq!(merged.value(), Some(Err(OpError::AllFailed)));
    }

    #[test]
    fn any_success_keeps_success_even_if_the_rest_fail_later() {
        let inputs: Vec<Promise<u32>> = vec![Promise::new(), Promise::new()];
        let merged = any_success(&inputs);

        inputs[0].ok(11);
        inputs[1].fail(OpError::Os(libc::EIO));

        assert_eq!(merged.value(), Some(Ok(11)));
    }
}
