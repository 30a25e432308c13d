use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DbError {
    #[snafu(display("Failed to open database at {path}"))]
    Open {
        path: String,
        source: sqlx::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to run schema migrations"))]
    Migrate {
        source: sqlx::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Query { source: sqlx::Error },
}

pub type DbResult<T> = std::result::Result<T, DbError>;
