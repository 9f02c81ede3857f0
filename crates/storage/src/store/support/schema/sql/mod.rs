#![forbid(unsafe_code)]

mod agents;
mod core;
mod events;
mod indexes;
mod leases;
mod messages;
mod pragmas;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(pragmas::SQL);
    sql.push_str(core::SQL);
    sql.push_str(agents::SQL);
    sql.push_str(leases::SQL);
    sql.push_str(messages::SQL);
    sql.push_str(events::SQL);
    sql.push_str(indexes::SQL);
    sql
}
