use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::str;

use mistdb::{DbOptions, DB};
use rand::distributions;
use rand::prelude::Distribution;
use regex::Regex;

const PREFIX_KEY_RANGE: usize = 1000;
const NUM_TEST_THREADS: usize = 4;

/// The kinds of tasks that can be given to the test worker.
#[derive(Debug, Eq, PartialEq)]
enum TaskKind {
    /// Variant for shutting down the worker thread.
    Terminate,
}

/// The operations a worker performs against the database.
#[derive(Debug)]
enum Operation {
    Put,
    Delete,
    Get,
    Scan,
}

/// A struct holding a thread that runs operations for the test.
struct Worker {
    /// A number uniquely identifying this thread.
    thread_id: usize,

    /// A handle to the actual thread.
    thread_handle: Option<JoinHandle<()>>,

    /// Sender end of the channel that the worker utilizes to schedule tasks.
    task_sender: mpsc::Sender<TaskKind>,
}

impl Worker {
    /// Create a new [`Worker`] instance.
    fn new(thread_id: usize, db: &Arc<DB>, worker_ops_counter: Vec<Arc<AtomicUsize>>) -> Self {
        // Create a channel for sending tasks
        let (task_sender, task_receiver) = mpsc::channel();

        log::info!("Starting test worker thread with id {thread_id}");
        let db = Arc::clone(db);
        let thread_handle = thread::Builder::new()
            .name(format!("test-worker-{thread_id}"))
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let key_dist = distributions::Uniform::from(0..PREFIX_KEY_RANGE);
                let op_dist = distributions::Uniform::from(0..100_usize);
                let mut counter: usize = 0;
                let value_regex =
                    Regex::new(r"(?P<key>\d+)\.(?P<thread_id>\d+)\.(?P<counter>\d+)").unwrap();

                loop {
                    worker_ops_counter[thread_id].store(counter, Ordering::Release);

                    match task_receiver.try_recv() {
                        Ok(TaskKind::Terminate) => {
                            log::info!(
                                "Thread {thread_id} received the termination command. Shutting \
                                down the thread",
                            );
                            break;
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(err) => {
                            log::warn!(
                                "Thread {thread_id} received an error when checking the task \
                                channel for new tasks. Error: {err}"
                            );
                        }
                    };

                    let key = key_dist.sample(&mut rng);
                    let formatted_key = format!("{key:016}");
                    let operation = match op_dist.sample(&mut rng) {
                        0..=44 => Operation::Put,
                        45..=54 => Operation::Delete,
                        55..=94 => Operation::Get,
                        _ => Operation::Scan,
                    };

                    match operation {
                        Operation::Put => {
                            let value = Worker::create_test_value(&formatted_key, thread_id, counter);
                            db.put(formatted_key.as_bytes(), value.as_bytes()).unwrap();
                        }
                        Operation::Delete => {
                            db.delete(formatted_key.as_bytes()).unwrap();
                        }
                        Operation::Get => {
                            let maybe_value = db.get(formatted_key.as_bytes()).unwrap_or_else(|read_err| {
                                panic!(
                                    "There was an error reading from the database in thread \
                                    {thread_id}. Error: {read_err}"
                                )
                            });
                            if let Some(value) = maybe_value {
                                Worker::check_value(
                                    &value_regex,
                                    &worker_ops_counter,
                                    key,
                                    &value,
                                );
                            }
                        }
                        Operation::Scan => {
                            let mut iter = db.new_iterator().unwrap();
                            iter.seek(formatted_key.as_bytes()).unwrap();
                            let mut maybe_prev_key: Option<Vec<u8>> = None;
                            let mut num_scanned: usize = 0;
                            while let Some((curr_key, curr_value)) = iter.current() {
                                if let Some(prev_key) = maybe_prev_key.as_ref() {
                                    assert!(
                                        prev_key.as_slice() < curr_key,
                                        "Expected iterator keys to be strictly increasing."
                                    );
                                }

                                let parsed_key = str::from_utf8(curr_key)
                                    .unwrap()
                                    .parse::<usize>()
                                    .unwrap();
                                Worker::check_value(
                                    &value_regex,
                                    &worker_ops_counter,
                                    parsed_key,
                                    curr_value,
                                );
                                maybe_prev_key = Some(curr_key.to_vec());

                                num_scanned += 1;
                                if num_scanned >= 20 {
                                    break;
                                }
                                iter.next();
                            }
                            iter.status().unwrap();
                            iter.close();
                        }
                    }

                    counter += 1;
                }

                log::info!("Terminated thread {thread_id}");
            })
            .unwrap();

        Self {
            thread_id,
            thread_handle: Some(thread_handle),
            task_sender,
        }
    }

    fn terminate_thread(&mut self) -> Option<JoinHandle<()>> {
        if let Some(thread_handle) = self.thread_handle.take() {
            if self.task_sender.send(TaskKind::Terminate).is_err() {
                log::debug!(
                    "Worker thread {} has already been terminated.",
                    self.thread_id
                );
            }

            return Some(thread_handle);
        }

        None
    }

    fn create_test_value(key: &str, thread_id: usize, counter: usize) -> String {
        // The counter is padded a bunch to encourage compactions to occur
        format!("{key}.{thread_id}.{counter:<1000}")
    }

    /// Check that a stored value is well formed and belongs to `key`.
    fn check_value(
        value_regex: &Regex,
        worker_ops_counter: &[Arc<AtomicUsize>],
        key: usize,
        value: &[u8],
    ) {
        let value = str::from_utf8(value).unwrap();
        let captures = value_regex.captures(value).unwrap();
        let stored_key = captures["key"].parse::<usize>().unwrap();
        let stored_thread_id = captures["thread_id"].parse::<usize>().unwrap();
        let stored_counter = captures["counter"].parse::<usize>().unwrap();

        assert_eq!(
            stored_key, key,
            "Expected the key in the value ({stored_key}) to be the same as the key ({key}) that \
            we used to retrieve the value."
        );
        assert!(
            stored_thread_id < NUM_TEST_THREADS,
            "Expected a valid thread id to be stored in the value. Got {stored_thread_id}"
        );

        // Check that the counter value stored in the database is less than the current counter
        // value of the thread that stored that value
        let expected_counter_value = worker_ops_counter[stored_thread_id].load(Ordering::Acquire);
        assert!(
            stored_counter <= expected_counter_value,
            "The stored counter value ({stored_counter}) should be less than or equal to the \
            current counter value ({expected_counter_value}) of the thread that stored it."
        );
    }
}

/// Manages a pool of worker threads used for running testing operations.
struct ThreadManager {
    /// Pool of workers.
    workers: Vec<Worker>,

    /// Counters keeping track of the number of operations performed by each worker.
    worker_op_counters: Vec<Arc<AtomicUsize>>,
}

impl ThreadManager {
    /// Create a new instance of [`ThreadManager`].
    fn new(db: &Arc<DB>, num_workers: usize) -> Self {
        let worker_op_counters: Vec<Arc<AtomicUsize>> = (0..num_workers)
            .map(|_| Arc::new(AtomicUsize::new(0)))
            .collect();

        let workers = (0..num_workers)
            .map(|idx| Worker::new(idx, db, worker_op_counters.clone()))
            .collect();

        Self {
            workers,
            worker_op_counters,
        }
    }

    /// Stop the worker threads. Returns true if all workers shutdown successfully.
    fn stop_workers(&mut self) -> bool {
        log::info!("Terminating worker threads.");
        let mut all_workers_successful = true;
        for worker in &mut self.workers {
            if let Some(join_handle) = worker.terminate_thread() {
                if let Err(thread_panic_val) = join_handle.join() {
                    log::error!(
                        "Worker thread {} panicked while exiting. Panic value: {:?}",
                        worker.thread_id,
                        thread_panic_val
                    );

                    all_workers_successful = false;
                }
            }
        }

        log::info!(
            "Worker threads terminated. Worker operation summary: [ {ops_summary} ]",
            ops_summary = self.worker_op_counters_to_string()
        );
        all_workers_successful
    }

    /// Get a string representation of the worker operation counters.
    fn worker_op_counters_to_string(&self) -> String {
        self.worker_op_counters
            .iter()
            .map(|counter| counter.load(Ordering::Acquire).to_string())
            .collect::<Vec<String>>()
            .join(", ")
    }
}

fn setup() {
    let _ = env_logger::builder()
        // Include info events in tests. Debug events from every worker are too noisy.
        .filter_level(log::LevelFilter::Info)
        // Ensure events are captured by `cargo test`
        .is_test(true)
        // Ignore errors initializing the logger if tests race to configure it
        .try_init();
}

#[test]
fn multiple_threads_can_write_to_and_read_from_the_database() {
    setup();

    const TEST_RUN_DURATION: Duration = Duration::from_millis(3 * 1000);

    let temp_dir = tempfile::tempdir().unwrap();
    let options = DbOptions {
        create_if_missing: true,
        db_path: temp_dir.path().join("multi-threaded").to_str().unwrap().to_owned(),
        // A small write buffer forces frequent flushes and compactions
        write_buffer_size: 64 * 1024,
        ..DbOptions::default()
    };

    let db = Arc::new(DB::open(options.clone()).unwrap());
    let mut thread_manager = ThreadManager::new(&db, NUM_TEST_THREADS);

    // Let tests run for a period of time
    thread::sleep(TEST_RUN_DURATION);

    // Stop threads
    let were_workers_successful = thread_manager.stop_workers();
    assert!(
        were_workers_successful,
        "A worker panicked for some reason. Check the test logs for the failure reason."
    );

    // Everything readable before closing is readable after a reopen
    let mut expected = vec![];
    for key in 0..PREFIX_KEY_RANGE {
        let formatted_key = format!("{key:016}");
        expected.push(db.get(formatted_key.as_bytes()).unwrap());
    }
    db.close().unwrap();
    drop(db);

    let db = DB::open(options).unwrap();
    for (key, expected_value) in expected.into_iter().enumerate() {
        let formatted_key = format!("{key:016}");
        assert_eq!(db.get(formatted_key.as_bytes()).unwrap(), expected_value);
    }
}
