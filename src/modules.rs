//! The five logical test groups and their built-in source layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown module '{0}'")]
pub struct UnknownModule(pub String);

/// A logical group of regression tests with its own log and history file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    BenchsaleAdmin,
    BenchsaleRecruiter,
    /// Combined BenchSale view over both admin and recruiter suites.
    BenchsaleTest,
    Employer,
    Jobseeker,
}

impl Module {
    pub const ALL: [Module; 5] = [
        Module::BenchsaleAdmin,
        Module::BenchsaleRecruiter,
        Module::BenchsaleTest,
        Module::Employer,
        Module::Jobseeker,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Module::BenchsaleAdmin => "benchsale_admin",
            Module::BenchsaleRecruiter => "benchsale_recruiter",
            Module::BenchsaleTest => "benchsale_test",
            Module::Employer => "employer",
            Module::Jobseeker => "jobseeker",
        }
    }

    /// Built-in display name, log file and source test files.
    pub fn default_spec(self) -> ModuleSpec {
        let (name, log_file, test_files): (&str, &str, &[&str]) = match self {
            Module::BenchsaleAdmin => (
                "BenchSale Admin",
                "logs/benchsale_admin.log",
                &["tests/benchsale/test_benchsale_admin_test_cases.py"],
            ),
            Module::BenchsaleRecruiter => (
                "BenchSale Recruiter",
                "logs/benchsale_recruiter.log",
                &["tests/benchsale/test_benchsale_recruiter_test_cases.py"],
            ),
            Module::BenchsaleTest => (
                "BenchSale Main Test",
                "logs/benchsale_test.log",
                &[
                    "tests/benchsale/test_benchsale_admin_test_cases.py",
                    "tests/benchsale/test_benchsale_recruiter_test_cases.py",
                ],
            ),
            Module::Employer => (
                "Employer",
                "logs/employer.log",
                &["tests/employer/test_employer_test_cases.py"],
            ),
            Module::Jobseeker => (
                "JobSeeker",
                "logs/jobseeker.log",
                &[
                    "tests/jobseeker/test_jobseeker_test_cases.py",
                    "tests/jobseeker/test_t1_09_db_solr_sync.py",
                ],
            ),
        };
        ModuleSpec {
            name: name.to_string(),
            log_file: log_file.to_string(),
            test_files: test_files.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.id() == s)
            .ok_or_else(|| UnknownModule(s.to_string()))
    }
}

/// Where a module's data comes from, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub log_file: String,
    pub test_files: Vec<String>,
}

/// Entry of `GET /api/modules`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    pub id: &'static str,
    pub name: String,
    pub log_file: String,
}
