use alphaplan::{
    AlphaVector, BeliefState, CancellationToken, ExecutorConfig, StoreConfig, Task, TaskExecutor,
    TaskPhase, ValueFunctionStore, WaitOutcome,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn executor(workers: usize) -> Arc<TaskExecutor> {
    Arc::new(
        TaskExecutor::new(ExecutorConfig {
            workers,
            wait_poll_interval: Duration::from_millis(5),
            join_timeout: Duration::from_secs(2),
        })
        .unwrap(),
    )
}

fn uncached(parallel_threshold: usize) -> StoreConfig {
    StoreConfig {
        caching: false,
        parallel_threshold,
        chunk_size: 16,
        ..StoreConfig::default()
    }
}

#[test]
fn parallel_and_sequential_scans_agree() {
    let mut rng = StdRng::seed_from_u64(17);
    let states = 6;
    let sequential = ValueFunctionStore::new(states, uncached(usize::MAX)).unwrap();
    let parallel = ValueFunctionStore::new(states, uncached(32))
        .unwrap()
        .with_executor(executor(4));

    let vectors: Vec<Arc<AlphaVector>> = (0..300)
        .map(|a| {
            let coefficients = (0..states).map(|_| rng.gen_range(-10.0..10.0)).collect();
            Arc::new(AlphaVector::new(a, coefficients).unwrap())
        })
        .collect();
    sequential.add_all(vectors.iter().map(|v| Arc::new(v.duplicate()))).unwrap();
    parallel.add_all(vectors.iter().map(|v| Arc::new(v.duplicate()))).unwrap();

    for _ in 0..50 {
        let weights: Vec<f64> = (0..states).map(|_| rng.gen_range(0.0..1.0)).collect();
        let belief = BeliefState::from_dense(&weights).unwrap();
        let a = sequential.get_max_alpha(&belief).unwrap().unwrap();
        let b = parallel.get_max_alpha(&belief).unwrap().unwrap();
        assert_eq!(a.action(), b.action());
        assert_eq!(sequential.value_at(&belief).unwrap(), parallel.value_at(&belief).unwrap());
    }

    let stats = parallel.executor().unwrap().stats();
    assert!(stats["dot_product"].executions > 0);
}

#[test]
fn scan_falls_back_after_executor_shutdown() {
    let pool = executor(2);
    let store = ValueFunctionStore::new(2, uncached(4))
        .unwrap()
        .with_executor(Arc::clone(&pool));
    for a in 0..10 {
        #[allow(clippy::cast_precision_loss)]
        let x = a as f64;
        store.add(AlphaVector::new(a, vec![x, 10.0 - x]).unwrap(), false).unwrap();
    }
    pool.shutdown();

    let belief = BeliefState::from_dense(&[1.0, 0.0]).unwrap();
    assert_eq!(store.best_action(&belief).unwrap(), Some(9));
}

struct InsertTask {
    store: Arc<ValueFunctionStore>,
}

impl Task for InsertTask {
    fn kind(&self) -> &'static str {
        "insert"
    }

    fn run(&self, _token: &CancellationToken) {
        self.store
            .add(AlphaVector::new(0, vec![20.0, 20.0]).unwrap(), false)
            .unwrap();
    }
}

#[test]
fn scan_in_pass_finishes_while_the_only_worker_waits_to_write() {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let pool = executor(1);
        let store = Arc::new(
            ValueFunctionStore::new(2, uncached(4))
                .unwrap()
                .with_executor(Arc::clone(&pool)),
        );
        for a in 0..10 {
            #[allow(clippy::cast_precision_loss)]
            let x = a as f64;
            store.add(AlphaVector::new(a, vec![x, 10.0 - x]).unwrap(), false).unwrap();
        }

        let pass = store.begin_evaluation().unwrap();
        let writer = pool
            .submit(Arc::new(InsertTask {
                store: Arc::clone(&store),
            }))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while writer.phase() != TaskPhase::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // Give the writer time to park on the lock.
        thread::sleep(Duration::from_millis(20));

        let belief = BeliefState::from_dense(&[1.0, 0.0]).unwrap();
        let value = pass.value_at(&belief).unwrap();
        let action = pass.best_action(&belief).unwrap();
        drop(pass);

        let outcome = pool.wait_for(&writer);
        tx.send((value, action, outcome, store.len().unwrap())).unwrap();
    });

    let (value, action, outcome, len) = rx
        .recv_timeout(Duration::from_secs(20))
        .expect("scan inside an evaluation pass never returned");
    assert_eq!(value, 9.0);
    assert_eq!(action, Some(9));
    assert_eq!(outcome, WaitOutcome::Completed);
    assert_eq!(len, 11);
}
