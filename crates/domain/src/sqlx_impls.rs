//! 状态枚举与数据库VARCHAR列之间的转换

use crate::entities::{TaskStatus, TaskType, UrlStatus, WorkerStatus};

macro_rules! impl_varchar_enum {
    ($ty:ty, $label:literal, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                match s {
                    $($text => Ok($variant),)+
                    _ => Err(format!(concat!("Invalid ", $label, ": {}"), s).into()),
                }
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                let s = match self {
                    $($variant => $text,)+
                };
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
            }
        }
    };
}

impl_varchar_enum!(TaskStatus, "task status", {
    TaskStatus::Todo => "todo",
    TaskStatus::Processing => "processing",
    TaskStatus::Done => "done",
    TaskStatus::Error => "error",
});

impl_varchar_enum!(TaskType, "task type", {
    TaskType::Setup => "setup",
    TaskType::UrlDiscovery => "url_discovery",
    TaskType::MetadataExtraction => "metadata_extraction",
    TaskType::FileGeneration => "file_generation",
    TaskType::SetNextSchedule => "set_next_schedule",
    TaskType::Cleanup => "cleanup",
});

impl_varchar_enum!(UrlStatus, "url status", {
    UrlStatus::New => "new",
    UrlStatus::Processing => "processing",
    UrlStatus::Done => "done",
    UrlStatus::Failed => "failed",
});

impl_varchar_enum!(WorkerStatus, "worker status", {
    WorkerStatus::Idle => "idle",
    WorkerStatus::Active => "active",
    WorkerStatus::Failed => "failed",
    WorkerStatus::Completed => "completed",
});
