mod discovery;
mod log;
mod runner;
mod search;

pub use discovery::{extract_test_functions, is_test_file, TestDiscovery, TestFileReport};
pub use log::{log_file_name, RunLog};
pub use runner::{PytestRunner, TestRun, TestRunner, NO_TEST_FILES};
pub use search::{UpdateTester, RESET_FAILED, TESTS_FAILED, TESTS_TIMED_OUT};
