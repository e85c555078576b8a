//! The trampoline evaluator.
//!
//! A rewritten function body becomes a *step function*: instead of calling
//! itself, it returns `Need(key)` for the first dependency missing from the
//! cache, or `Done(value)` once every dependency it reads is present.
//! [`drive`] replays step functions against an explicit work list until the
//! requested key resolves, so recursion depth never touches the native call
//! stack.

use std::collections::HashMap;
use std::hash::Hash;

/// What one step invocation produced for its key.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<K, V> {
    /// The final value for the key under evaluation.
    Done(V),
    /// Evaluation cannot proceed until this other key has a cached value.
    Need(K),
}

/// Write-once result store shared between a wrapper and the driver.
///
/// `store` must keep the first value written for a key; it reports whether
/// the write took effect.
pub trait DepCache<K, V> {
    fn lookup(&self, key: &K) -> Option<V>;
    fn store(&mut self, key: K, value: V) -> bool;
}

impl<K: Eq + Hash, V: Clone> DepCache<K, V> for HashMap<K, V> {
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }

    fn store(&mut self, key: K, value: V) -> bool {
        if self.contains_key(&key) {
            return false;
        }
        self.insert(key, value);
        true
    }
}

/// Evaluates `initial` by repeatedly invoking `step` with keys from an
/// explicit work list.
///
/// A popped key already in the cache is dropped. `Need(dep)` re-queues the
/// current key below its dependency, so the dependency resolves first;
/// because a step function is restarted from the top each time, any
/// removal order would be correct, and the LIFO order is only a matter of
/// fewer redundant replays. `Done(value)` is stored and never overwritten.
///
/// Termination is the caller's bargain: a cycle of keys that never reaches
/// `Done` loops forever. The only way out is the step callback's error
/// channel, which aborts the whole evaluation.
pub fn drive<K, V, C, S, E>(mut step: S, initial: K, cache: &mut C) -> Result<V, E>
where
    K: Clone + PartialEq,
    V: Clone,
    C: DepCache<K, V>,
    S: FnMut(&K) -> Result<Outcome<K, V>, E>,
{
    if let Some(hit) = cache.lookup(&initial) {
        return Ok(hit);
    }

    let mut frontier = vec![initial.clone()];
    let mut resolved = None;

    while let Some(current) = frontier.pop() {
        if let Some(existing) = cache.lookup(&current) {
            if resolved.is_none() && current == initial {
                resolved = Some(existing);
            }
            continue;
        }

        match step(&current)? {
            Outcome::Need(dep) => {
                frontier.push(current);
                frontier.push(dep);
            }
            Outcome::Done(value) => {
                if current == initial {
                    resolved = Some(value.clone());
                }
                cache.store(current, value);
            }
        }
    }

    match resolved {
        Some(value) => Ok(value),
        // The initial key only ever leaves the frontier through Done or a
        // cache hit, both of which set `resolved`.
        None => unreachable!("frontier drained before the initial key resolved"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StepBudgetExceeded;

    fn fib_step(key: &i64, cache: &HashMap<i64, u64>) -> Outcome<i64, u64> {
        let n = *key;
        if n <= 1 {
            return Outcome::Done(n as u64);
        }
        let a = match cache.get(&(n - 1)) {
            Some(v) => *v,
            None => return Outcome::Need(n - 1),
        };
        let b = match cache.get(&(n - 2)) {
            Some(v) => *v,
            None => return Outcome::Need(n - 2),
        };
        Outcome::Done((a + b) % 1000)
    }

    // The step closure reads the same cache `drive` writes to, so the
    // tests share it through a RefCell exactly the way the interpreter's
    // dict-backed cache does.
    struct SharedCache(std::rc::Rc<std::cell::RefCell<HashMap<i64, u64>>>);

    impl DepCache<i64, u64> for SharedCache {
        fn lookup(&self, key: &i64) -> Option<u64> {
            self.0.borrow().get(key).copied()
        }

        fn store(&mut self, key: i64, value: u64) -> bool {
            let mut map = self.0.borrow_mut();
            if map.contains_key(&key) {
                return false;
            }
            map.insert(key, value);
            true
        }
    }

    #[test]
    fn resolves_base_cases_and_small_values() {
        use std::cell::RefCell;
        use std::rc::Rc;

        for (n, expected) in [(0, 0), (1, 1), (5, 5), (10, 55)] {
            let shared: Rc<RefCell<HashMap<i64, u64>>> = Rc::new(RefCell::new(HashMap::new()));
            let mut cache = SharedCache(Rc::clone(&shared));
            let step_view = Rc::clone(&shared);
            let result: Result<u64, ()> =
                drive(|k| Ok(fib_step(k, &step_view.borrow())), n, &mut cache);
            assert_eq!(result.unwrap(), expected);
        }
    }

    #[test]
    fn deep_recursion_does_not_grow_the_stack() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let shared: Rc<RefCell<HashMap<i64, u64>>> = Rc::new(RefCell::new(HashMap::new()));
        let mut cache = SharedCache(Rc::clone(&shared));

        let step_view = Rc::clone(&shared);
        let result: Result<u64, ()> =
            drive(|k| Ok(fib_step(k, &step_view.borrow())), 100_000, &mut cache);

        let mut a: u64 = 0;
        let mut b: u64 = 1;
        for _ in 0..100_000 {
            let next = (a + b) % 1000;
            a = b;
            b = next;
        }
        assert_eq!(result.unwrap(), a);
    }

    #[test]
    fn each_key_is_resolved_exactly_once() {
        use std::cell::RefCell;
        use std::rc::Rc;

        // Two-branch tree recursion over indices 0..n, as in a
        // minimum-of-neighbours scan: every index must be resolved exactly
        // once no matter how many call sites reference it.
        let n: i64 = 200;
        let shared: Rc<RefCell<HashMap<i64, u64>>> = Rc::new(RefCell::new(HashMap::new()));
        let mut cache = SharedCache(Rc::clone(&shared));
        let done_counts: Rc<RefCell<HashMap<i64, usize>>> = Rc::new(RefCell::new(HashMap::new()));

        let step_view = Rc::clone(&shared);
        let counts = Rc::clone(&done_counts);
        let result: Result<u64, ()> = drive(
            |k| {
                let i = *k;
                if i >= n {
                    *counts.borrow_mut().entry(i).or_insert(0) += 1;
                    return Ok(Outcome::Done(1));
                }
                let left = match step_view.borrow().get(&(i + 1)).copied() {
                    Some(v) => v,
                    None => return Ok(Outcome::Need(i + 1)),
                };
                let right = match step_view.borrow().get(&(i + 2)).copied() {
                    Some(v) => v,
                    None => return Ok(Outcome::Need(i + 2)),
                };
                *counts.borrow_mut().entry(i).or_insert(0) += 1;
                Ok(Outcome::Done((left + right) % 997))
            },
            0,
            &mut cache,
        );

        result.unwrap();
        let counts = done_counts.borrow();
        assert_eq!(counts.len(), shared.borrow().len());
        assert!(counts.values().all(|&c| c == 1));
    }

    #[test]
    fn cached_initial_key_invokes_no_steps() {
        let mut cache: HashMap<i64, u64> = HashMap::new();
        cache.insert(7, 13);

        let mut invocations = 0;
        let result: Result<u64, ()> = drive(
            |_| {
                invocations += 1;
                Ok(Outcome::Done(0))
            },
            7,
            &mut cache,
        );

        assert_eq!(result.unwrap(), 13);
        assert_eq!(invocations, 0);
    }

    #[test]
    fn first_stored_value_wins() {
        let mut cache: HashMap<i64, u64> = HashMap::new();
        assert!(cache.store(1, 10));
        assert!(!cache.store(1, 99));
        assert_eq!(cache.lookup(&1), Some(10));
    }

    #[test]
    fn circular_dependencies_loop_until_externally_bounded() {
        // Key 0 needs key 1 and key 1 needs key 0; neither ever returns
        // Done. The driver itself never gives up, so the step closure
        // imposes the bound through its error channel.
        let mut cache: HashMap<i64, u64> = HashMap::new();
        let mut invocations = 0;

        let result = drive(
            |k| {
                invocations += 1;
                if invocations > 10_000 {
                    return Err(StepBudgetExceeded);
                }
                Ok(Outcome::Need(1 - *k))
            },
            0,
            &mut cache,
        );

        assert!(result.is_err());
        assert!(invocations > 10_000);
        assert!(cache.is_empty());
    }
}
