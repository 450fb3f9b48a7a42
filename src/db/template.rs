//! Canonical definition of every table a school schema must contain.
//!
//! Provisioning and drift repair are both driven from this one structure:
//! `CREATE TABLE` statements are rendered from it for new schemas, and
//! `information_schema` is diffed against it to add whatever an existing
//! schema is missing. Statements use a `{schema}` placeholder that callers
//! fill with a validated [`SchemaName`](super::schema::SchemaName).

/// One column of a template table.
pub struct ColumnDef {
    pub name: &'static str,
    /// Type + constraints as they appear in CREATE TABLE / ADD COLUMN.
    /// Columns added by drift repair must therefore be either nullable or
    /// carry a DEFAULT.
    pub ddl: &'static str,
    /// Optional backfill statement run once right after the column is added
    /// to an existing schema, for denormalized display fields. Best-effort.
    pub backfill: Option<&'static str>,
}

/// One table of the namespace template.
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Table-level constraint clauses appended after the column list.
    pub constraints: &'static [&'static str],
    /// `CREATE INDEX IF NOT EXISTS` statements, `{schema}`-parameterized.
    pub indexes: &'static [&'static str],
}

impl TableDef {
    /// Renders the idempotent CREATE TABLE statement for this table.
    pub fn create_sql(&self, schema: &str) -> String {
        let mut items: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ddl))
            .collect();
        items.extend(self.constraints.iter().map(|c| c.to_string()));
        format!(
            "CREATE TABLE IF NOT EXISTS \"{{schema}}\".{} (\n    {}\n)",
            self.name,
            items.join(",\n    ")
        )
        .replace("{schema}", schema)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

const fn col(name: &'static str, ddl: &'static str) -> ColumnDef {
    ColumnDef { name, ddl, backfill: None }
}

/// Every table a school schema must contain, in creation order (referenced
/// tables first).
pub static SCHOOL_TEMPLATE: &[TableDef] = &[
    TableDef {
        name: "students",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("first_name", "VARCHAR(128) NOT NULL"),
            col("last_name", "VARCHAR(128) NOT NULL"),
            col("year_group", "VARCHAR(32)"),
            col("form_class", "VARCHAR(32)"),
            col("external_ref", "VARCHAR(64)"),
            col("is_active", "BOOLEAN NOT NULL DEFAULT TRUE"),
            col("created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
            col("updated_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &[],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS students_name_idx ON \"{schema}\".students(last_name, first_name)",
            "CREATE INDEX IF NOT EXISTS students_form_idx ON \"{schema}\".students(form_class)",
        ],
    },
    TableDef {
        name: "staff",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("user_id", "UUID"),
            col("display_name", "VARCHAR(255) NOT NULL"),
            col("role", "VARCHAR(32) NOT NULL DEFAULT 'teacher'"),
            col("is_active", "BOOLEAN NOT NULL DEFAULT TRUE"),
            col("created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &[],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS staff_user_idx ON \"{schema}\".staff(user_id)",
        ],
    },
    TableDef {
        name: "incidents",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("student_id", "UUID NOT NULL REFERENCES \"{schema}\".students(id) ON DELETE CASCADE"),
            ColumnDef {
                name: "student_name",
                ddl: "VARCHAR(255)",
                backfill: Some(
                    "UPDATE \"{schema}\".incidents i
                        SET student_name = s.first_name || ' ' || s.last_name
                       FROM \"{schema}\".students s
                      WHERE s.id = i.student_id AND i.student_name IS NULL",
                ),
            },
            col("reported_by", "UUID REFERENCES \"{schema}\".staff(id) ON DELETE SET NULL"),
            col("category", "VARCHAR(64) NOT NULL"),
            col("severity", "SMALLINT NOT NULL DEFAULT 1"),
            col("points", "INT NOT NULL DEFAULT 0"),
            col("description", "TEXT"),
            col("occurred_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
            col("created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &["CHECK (severity BETWEEN 1 AND 5)"],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS incidents_student_idx ON \"{schema}\".incidents(student_id)",
            "CREATE INDEX IF NOT EXISTS incidents_occurred_idx ON \"{schema}\".incidents(occurred_at DESC)",
        ],
    },
    TableDef {
        name: "merits",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("student_id", "UUID NOT NULL REFERENCES \"{schema}\".students(id) ON DELETE CASCADE"),
            ColumnDef {
                name: "student_name",
                ddl: "VARCHAR(255)",
                backfill: Some(
                    "UPDATE \"{schema}\".merits m
                        SET student_name = s.first_name || ' ' || s.last_name
                       FROM \"{schema}\".students s
                      WHERE s.id = m.student_id AND m.student_name IS NULL",
                ),
            },
            col("awarded_by", "UUID REFERENCES \"{schema}\".staff(id) ON DELETE SET NULL"),
            col("reason", "VARCHAR(255) NOT NULL"),
            col("points", "INT NOT NULL DEFAULT 1"),
            col("awarded_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &[],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS merits_student_idx ON \"{schema}\".merits(student_id)",
        ],
    },
    TableDef {
        name: "detentions",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("student_id", "UUID NOT NULL REFERENCES \"{schema}\".students(id) ON DELETE CASCADE"),
            col("incident_id", "UUID REFERENCES \"{schema}\".incidents(id) ON DELETE SET NULL"),
            col("scheduled_for", "TIMESTAMPTZ NOT NULL"),
            col("duration_minutes", "SMALLINT NOT NULL DEFAULT 30"),
            col("location", "VARCHAR(128)"),
            col("status", "VARCHAR(16) NOT NULL DEFAULT 'scheduled'"),
            col("created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &["CHECK (duration_minutes > 0)"],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS detentions_student_idx ON \"{schema}\".detentions(student_id)",
            "CREATE INDEX IF NOT EXISTS detentions_scheduled_idx ON \"{schema}\".detentions(scheduled_for)",
        ],
    },
    TableDef {
        name: "messages",
        columns: &[
            col("id", "UUID PRIMARY KEY DEFAULT public.uuid_generate_v4()"),
            col("sender_id", "UUID REFERENCES \"{schema}\".staff(id) ON DELETE SET NULL"),
            col("student_id", "UUID REFERENCES \"{schema}\".students(id) ON DELETE CASCADE"),
            col("subject", "VARCHAR(255)"),
            col("body", "TEXT NOT NULL"),
            col("is_read", "BOOLEAN NOT NULL DEFAULT FALSE"),
            col("created_at", "TIMESTAMPTZ NOT NULL DEFAULT NOW()"),
        ],
        constraints: &[],
        indexes: &[
            "CREATE INDEX IF NOT EXISTS messages_student_idx ON \"{schema}\".messages(student_id)",
            "CREATE INDEX IF NOT EXISTS messages_created_idx ON \"{schema}\".messages(created_at DESC)",
        ],
    },
];

pub fn table(name: &str) -> Option<&'static TableDef> {
    SCHOOL_TEMPLATE.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_names_are_unique_and_valid_identifiers() {
        let mut seen = HashSet::new();
        for t in SCHOOL_TEMPLATE {
            assert!(seen.insert(t.name), "duplicate table {}", t.name);
            assert!(t
                .name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b == b'_'));
            assert!(!t.columns.is_empty());
        }
    }

    #[test]
    fn column_names_are_unique_per_table() {
        for t in SCHOOL_TEMPLATE {
            let mut seen = HashSet::new();
            for c in t.columns {
                assert!(seen.insert(c.name), "duplicate {}.{}", t.name, c.name);
            }
        }
    }

    #[test]
    fn create_sql_renders_all_columns() {
        let t = table("incidents").unwrap();
        let sql = t.create_sql("school_lear_1291");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"school_lear_1291\".incidents"));
        for c in t.columns {
            assert!(sql.contains(c.name), "missing column {}", c.name);
        }
        assert!(sql.contains("CHECK (severity BETWEEN 1 AND 5)"));
        assert!(!sql.contains("{schema}"), "unsubstituted placeholder");
        assert!(sql.contains("REFERENCES \"school_lear_1291\".students(id)"));
    }

    #[test]
    fn backfill_columns_are_nullable() {
        // Drift repair adds columns to tables that already hold rows; a
        // backfillable column must not carry NOT NULL without a default.
        for t in SCHOOL_TEMPLATE {
            for c in t.columns.iter().filter(|c| c.backfill.is_some()) {
                assert!(
                    !c.ddl.contains("NOT NULL") || c.ddl.contains("DEFAULT"),
                    "{}.{} cannot be added to a populated table",
                    t.name,
                    c.name
                );
            }
        }
    }

    #[test]
    fn references_point_at_earlier_tables() {
        let mut created: HashSet<&str> = HashSet::new();
        for t in SCHOOL_TEMPLATE {
            for c in t.columns {
                if let Some(idx) = c.ddl.find("REFERENCES \"{schema}\".") {
                    let rest = &c.ddl[idx + "REFERENCES \"{schema}\".".len()..];
                    let target: &str =
                        rest.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
                            .next()
                            .unwrap();
                    assert!(
                        created.contains(target),
                        "{}.{} references {} before it is created",
                        t.name,
                        c.name,
                        target
                    );
                }
            }
            created.insert(t.name);
        }
    }
}
