use planvault_core::{Collection, Record, RecordId, Snapshot};

pub fn team(id: &str, name: &str, capacity: i64) -> Record {
    Record::new(id).with("name", name).with("capacity", capacity)
}

pub fn person(id: &str, name: &str) -> Record {
    Record::new(id)
        .with("name", name)
        .with("email", format!("{}@example.com", name.to_lowercase()))
}

pub fn membership(id: &str, team: &str, person: &str) -> Record {
    Record::new(id)
        .with("team_id", RecordId::new(team))
        .with("person_id", RecordId::new(person))
}

pub fn allocation(id: &str, person: &str, project: &str, percentage: i64) -> Record {
    Record::new(id)
        .with("person_id", RecordId::new(person))
        .with("project_id", RecordId::new(project))
        .with("percentage", percentage)
}

/// Two teams, three people, four memberships, one project with two
/// allocations and one goal.
pub fn live_snapshot() -> Snapshot {
    Snapshot::new()
        .with_records(
            Collection::Teams,
            vec![team("t1", "Core", 40), team("t2", "Platform", 30)],
        )
        .with_records(
            Collection::People,
            vec![person("p1", "Ada"), person("p2", "Grace"), person("p3", "Linus")],
        )
        .with_records(
            Collection::TeamMembers,
            vec![
                membership("m1", "t1", "p1"),
                membership("m2", "t1", "p2"),
                membership("m3", "t2", "p1"),
                membership("m4", "t2", "p3"),
            ],
        )
        .with_records(
            Collection::Projects,
            vec![Record::new("pr1").with("name", "Atlas").with("status", "active")],
        )
        .with_records(
            Collection::Allocations,
            vec![
                allocation("a1", "p1", "pr1", 50),
                allocation("a2", "p2", "pr1", 25),
            ],
        )
        .with_records(
            Collection::Goals,
            vec![
                Record::new("g1")
                    .with("name", "Ship Atlas")
                    .with("project_id", RecordId::new("pr1")),
            ],
        )
}
