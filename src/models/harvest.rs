use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use std::fmt;

/// Account credentials read from `~/.harvest`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app", &self.app)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// Shape of the file on disk. Fields are optional so a missing key can be
// reported by name instead of as a generic parse failure.
#[derive(Deserialize, Debug, Default)]
pub struct CredentialsFile {
    pub app: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Date range used by the timesheet and expense exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// January 1st to December 31st of the given year.
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            from: NaiveDate::from_ymd_opt(year, 1, 1)?,
            to: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    pub fn current_year() -> Self {
        let today = Local::now().date_naive();
        Self::year(today.year()).unwrap_or(Self {
            from: today,
            to: today,
        })
    }

    /// `from=YYYYMMDD&to=YYYYMMDD`, the form Harvest expects on report endpoints.
    pub fn query(&self) -> String {
        format!(
            "from={}&to={}",
            self.from.format("%Y%m%d"),
            self.to.format("%Y%m%d")
        )
    }
}

/// Collection that supplies the ids for a per-parent export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParentKind {
    Project,
    Client,
}

impl ParentKind {
    pub fn source(self) -> EntityType {
        match self {
            ParentKind::Project => EntityType::Projects,
            ParentKind::Client => EntityType::Clients,
        }
    }

    /// Key Harvest wraps each element in, e.g. `{"project": {...}}`.
    pub fn wrapper_key(self) -> &'static str {
        match self {
            ParentKind::Project => "project",
            ParentKind::Client => "client",
        }
    }
}

/// How the records of an entity type are retrieved.
#[derive(Clone, Copy, Debug)]
pub enum Retrieval {
    /// A single GET returns the whole collection.
    Collection { path: &'static str },
    /// `?page=N` from 1 until an empty page comes back.
    Paged { path: &'static str },
    /// One GET per parent id, results concatenated.
    PerParent {
        parent: ParentKind,
        path: fn(u64, &DateWindow) -> String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Clients,
    Projects,
    Contacts,
    People,
    Tasks,
    Invoices,
    ExpenseCategories,
    TasksForProject,
    TimesheetsForProject,
    ExpensesForProject,
    ProjectsForClient,
}

impl EntityType {
    /// Collections exported directly from their list endpoint.
    pub const PRIMARY: [EntityType; 7] = [
        EntityType::Clients,
        EntityType::Projects,
        EntityType::Contacts,
        EntityType::People,
        EntityType::Tasks,
        EntityType::Invoices,
        EntityType::ExpenseCategories,
    ];

    /// Collections fetched once per exported project or client.
    pub const PER_PARENT: [EntityType; 4] = [
        EntityType::ExpensesForProject,
        EntityType::TasksForProject,
        EntityType::TimesheetsForProject,
        EntityType::ProjectsForClient,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Clients => "clients",
            EntityType::Projects => "projects",
            EntityType::Contacts => "contacts",
            EntityType::People => "people",
            EntityType::Tasks => "tasks",
            EntityType::Invoices => "invoices",
            EntityType::ExpenseCategories => "expense_categories",
            EntityType::TasksForProject => "tasks_for_project",
            EntityType::TimesheetsForProject => "timesheets_for_project",
            EntityType::ExpensesForProject => "expenses_for_project",
            EntityType::ProjectsForClient => "projects_for_client",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }

    /// Key the collection sits under when the response is an envelope
    /// object rather than a bare array.
    pub fn collection_key(self) -> &'static str {
        match self {
            EntityType::TasksForProject => "task_assignments",
            EntityType::TimesheetsForProject => "day_entries",
            EntityType::ExpensesForProject => "expenses",
            EntityType::ProjectsForClient => "projects",
            other => other.name(),
        }
    }

    pub fn retrieval(self) -> Retrieval {
        match self {
            EntityType::Clients => Retrieval::Collection { path: "/clients" },
            EntityType::Projects => Retrieval::Collection { path: "/projects" },
            EntityType::Contacts => Retrieval::Collection { path: "/contacts" },
            EntityType::People => Retrieval::Collection { path: "/people" },
            EntityType::Tasks => Retrieval::Collection { path: "/tasks" },
            EntityType::Invoices => Retrieval::Paged { path: "/invoices" },
            EntityType::ExpenseCategories => Retrieval::Collection {
                path: "/expense_categories",
            },
            EntityType::TasksForProject => Retrieval::PerParent {
                parent: ParentKind::Project,
                path: |id, _| format!("/projects/{id}/task_assignments"),
            },
            EntityType::TimesheetsForProject => Retrieval::PerParent {
                parent: ParentKind::Project,
                path: |id, window| format!("/projects/{id}/entries?{}", window.query()),
            },
            EntityType::ExpensesForProject => Retrieval::PerParent {
                parent: ParentKind::Project,
                path: |id, window| format!("/projects/{id}/expenses?{}", window.query()),
            },
            EntityType::ProjectsForClient => Retrieval::PerParent {
                parent: ParentKind::Client,
                path: |id, _| format!("/projects?client={id}"),
            },
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
