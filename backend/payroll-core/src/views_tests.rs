// src/views_tests.rs

#[cfg(test)]
mod tests {
    use crate::aggregate::*;
    use crate::cells::CellValue;
    use crate::config::ViewConfig;
    use crate::ingest::{upsert_records, IngestRequest};
    use crate::ledger::{read_ledger, LEDGER_HEADERS};
    use crate::period::PeriodKey;
    use crate::store::{TableStore, Workbook};
    use crate::views::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    const RAW: &str = "payroll_raw";

    // Mid-May in Tokyo: current period 2024-05, previous 2024-04
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 3, 0, 0).unwrap()
    }

    // id, date, emp, min, yen, flags, name
    type Row<'a> = (&'a str, &'a str, &'a str, i64, i64, &'a str, &'a str);

    fn ledger_grid(rows: &[Row]) -> Vec<Vec<CellValue>> {
        let mut grid = vec![LEDGER_HEADERS.iter().map(|h| CellValue::text(*h)).collect()];
        for (id, date, emp, min, yen, flags, name) in rows {
            grid.push(vec![
                CellValue::text(*id),
                CellValue::text(*date),
                CellValue::text(*emp),
                CellValue::int(*min),
                CellValue::int(*min),
                CellValue::int(1200),
                CellValue::int(*yen),
                CellValue::text(*flags),
                CellValue::text("2024-05-15T03:00:00.000Z"),
                CellValue::text(*name),
            ]);
        }
        grid
    }

    fn workbook_with_ledger(rows: &[Row]) -> Workbook {
        let mut workbook = Workbook::new();
        workbook.create_table(RAW).unwrap();
        workbook.write_range(RAW, 0, 0, &ledger_grid(rows)).unwrap();
        workbook
    }

    fn sample_rows() -> Vec<Row<'static>> {
        vec![
            ("r1", "2024-05-01", "emp01", 60, 1200, "late", ""),
            ("r2", "2024-05-02", "emp01", 30, 600, "", ""),
        ]
    }

    fn views() -> PayrollViews {
        PayrollViews::new(ViewConfig::default())
    }

    fn texts(row: &[CellValue]) -> Vec<String> {
        row.iter().map(|c| c.to_string()).collect()
    }

    // --- Aggregation ---

    #[test]
    fn test_summarize_period_totals() {
        let records = read_ledger(&ledger_grid(&sample_rows())).unwrap();
        let period = PeriodKey::new(2024, 5).unwrap();
        let emps = vec!["emp01".to_string()];
        let mut names = BTreeMap::new();

        let aggregates = summarize_period(&records, period, &emps, &mut names);
        let agg = &aggregates["emp01"];
        assert_eq!(agg.total_minutes, 90);
        assert_eq!(agg.total_cost, 1800);
        assert_eq!(agg.flag_union.iter().collect::<Vec<_>>(), vec!["late"]);
        assert!(agg.needs_check());
        assert_eq!(agg.derived_hours(), 1.5);
    }

    #[test]
    fn test_summarize_period_lists_idle_employees() {
        let records = read_ledger(&ledger_grid(&sample_rows())).unwrap();
        let april = PeriodKey::new(2024, 4).unwrap();
        let emps = vec!["emp01".to_string()];
        let mut names = BTreeMap::new();

        let aggregates = summarize_period(&records, april, &emps, &mut names);
        assert_eq!(aggregates["emp01"], EmployeeAggregate::default());
        assert!(!aggregates["emp01"].needs_check());
    }

    #[test]
    fn test_detail_rows_in_ledger_order_with_name_carry_forward() {
        let rows = vec![
            ("r2", "2024-05-02", "emp01", 30, 600, "", "Alicia"),
            ("r1", "2024-05-01", "emp01", 60, 1200, "late", ""),
            ("r9", "2024-05-03", "emp02", 10, 200, "", "Bob"),
        ];
        let records = read_ledger(&ledger_grid(&rows)).unwrap();
        let period = PeriodKey::new(2024, 5).unwrap();
        let labels: BTreeMap<String, String> =
            [("emp01".to_string(), "Alice".to_string())].into_iter().collect();

        let detail = detail_rows(&records, period, "emp01", &BTreeMap::new(), &labels);
        assert_eq!(detail.len(), 3);
        assert_eq!(texts(&detail[0]), DETAIL_HEADER.to_vec());
        assert_eq!(
            texts(&detail[1]),
            vec!["2024-05-02", "emp01", "Alicia", "30", "30", "1200", "600", ""]
        );
        assert_eq!(
            texts(&detail[2]),
            vec!["2024-05-01", "emp01", "Alicia", "60", "60", "1200", "1200", "late"]
        );
    }

    // --- Full Refresh ---

    #[test]
    fn test_refresh_builds_summary_and_detail_tables() {
        let mut workbook = workbook_with_ledger(&sample_rows());
        let report = views().refresh(&mut workbook, now()).unwrap();

        assert_eq!(report.current, "2024-05");
        assert_eq!(report.previous, "2024-04");
        assert_eq!(report.records, 2);
        assert_eq!(
            report.tables,
            vec![
                SUMMARY_CURRENT_TABLE,
                SUMMARY_PREVIOUS_TABLE,
                "emp01_ThisMonth",
                "emp01_PrevMonth",
                RAW,
            ]
        );

        let summary = workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(texts(&summary[0]), SUMMARY_HEADER.to_vec());
        assert_eq!(
            summary[1],
            vec![
                CellValue::text("emp01"),
                CellValue::text(""),
                CellValue::text("2024-05"),
                CellValue::int(90),
                CellValue::Number(1.5),
                CellValue::int(1800),
                CellValue::int(1),
                CellValue::text("late"),
            ]
        );

        let previous = workbook.read_all(SUMMARY_PREVIOUS_TABLE).unwrap();
        assert_eq!(previous.len(), 2);
        assert_eq!(
            texts(&previous[1]),
            vec!["emp01", "", "2024-04", "0", "0", "0", "0", ""]
        );

        let detail = workbook.read_all("emp01_ThisMonth").unwrap();
        assert_eq!(detail.len(), 3);
        assert_eq!(detail[1][0], CellValue::text("2024-05-01"));
        assert_eq!(detail[2][0], CellValue::text("2024-05-02"));
        assert_eq!(workbook.read_all("emp01_PrevMonth").unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_applies_layout() {
        let mut workbook = workbook_with_ledger(&sample_rows());
        views().refresh(&mut workbook, now()).unwrap();

        let summary = workbook.table(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(summary.frozen_rows, 1);
        assert!(summary.bold_rows.contains(&0));
        assert_eq!(summary.column_widths.get(&7), Some(&240));
        let hours = &summary.number_formats[&4];
        assert_eq!((hours.first_row, hours.row_count), (1, 1));
        assert_eq!(hours.pattern, "0.00");

        // Header-only tables get no number formats
        let empty_detail = workbook.table("emp01_PrevMonth").unwrap();
        assert!(empty_detail.number_formats.is_empty());
        assert_eq!(empty_detail.column_widths.get(&7), Some(&260));
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let mut workbook = workbook_with_ledger(&sample_rows());
        views().refresh(&mut workbook, now()).unwrap();
        let first = workbook.clone();
        views().refresh(&mut workbook, now()).unwrap();
        assert_eq!(workbook, first);
    }

    #[test]
    fn test_refresh_names_tables_after_employees() {
        let rows = vec![
            ("r1", "2024-05-01", "emp01", 60, 1200, "", "Alice"),
            ("r2", "2024-05-01", "emp02", 60, 1200, "", "Alice"),
            ("r3", "2024-04-20", "emp03", 60, 1200, "", ""),
        ];
        let mut workbook = workbook_with_ledger(&rows);
        let config = ViewConfig::with_labels([("emp03", "Carol"), ("emp04", "Dan")]);
        let report = PayrollViews::new(config).refresh(&mut workbook, now()).unwrap();

        assert_eq!(
            report.tables,
            vec![
                SUMMARY_CURRENT_TABLE,
                SUMMARY_PREVIOUS_TABLE,
                "Alice_ThisMonth",
                "Alice_PrevMonth",
                "Alice_ThisMonth_emp02",
                "Alice_PrevMonth_emp02",
                "Carol_ThisMonth",
                "Carol_PrevMonth",
                "Dan_ThisMonth",
                "Dan_PrevMonth",
                RAW,
            ]
        );

        // Labelled employees without records get detail tables but no summary row
        let summary = workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap();
        let emps: Vec<String> = summary[1..].iter().map(|r| r[0].to_string()).collect();
        assert_eq!(emps, vec!["emp01", "emp02", "emp03"]);
        assert_eq!(summary[3][1], CellValue::text("Carol"));
    }

    #[test]
    fn test_refresh_previous_period_name_wins_for_tables() {
        let rows = vec![
            ("r1", "2024-05-02", "emp01", 60, 1200, "", "A"),
            ("r2", "2024-04-20", "emp01", 30, 600, "", "B"),
        ];
        let mut workbook = workbook_with_ledger(&rows);
        let report = views().refresh(&mut workbook, now()).unwrap();

        assert_eq!(
            report.tables,
            vec![
                SUMMARY_CURRENT_TABLE,
                SUMMARY_PREVIOUS_TABLE,
                "B_ThisMonth",
                "B_PrevMonth",
                RAW,
            ]
        );
        let current = workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(current[1][1], CellValue::text("A"));
        let previous = workbook.read_all(SUMMARY_PREVIOUS_TABLE).unwrap();
        assert_eq!(previous[1][1], CellValue::text("B"));

        // Detail rows start from the resolved name and pick up each record's own
        let detail = workbook.read_all("B_ThisMonth").unwrap();
        assert_eq!(detail[1][2], CellValue::text("A"));
        let detail = workbook.read_all("B_PrevMonth").unwrap();
        assert_eq!(detail[1][2], CellValue::text("B"));
    }

    #[test]
    fn test_refresh_saturates_huge_totals() {
        let mut workbook = Workbook::new();
        let batch = match IngestRequest::from_json(&json!([
            {"id": "r1", "date": "2024-05-01", "emp": "emp01", "min": 1e300, "yen": 1e300},
            {"id": "r2", "date": "2024-05-02", "emp": "emp01", "min": 1e300, "yen": 1e300}
        ])) {
            IngestRequest::Upsert(records) => records,
            IngestRequest::Clear => panic!("expected an upsert request"),
        };
        upsert_records(&mut workbook, RAW, &batch, now()).unwrap();

        views().refresh(&mut workbook, now()).unwrap();

        let summary = workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(summary[1][3], CellValue::int(i64::MAX));
        assert_eq!(summary[1][5], CellValue::int(i64::MAX));
    }

    #[test]
    fn test_refresh_migrates_legacy_names() {
        let mut workbook = workbook_with_ledger(&sample_rows());
        workbook.create_table(LEGACY_SUMMARY_CURRENT).unwrap();
        workbook
            .write_range(LEGACY_SUMMARY_CURRENT, 0, 0, &[vec![CellValue::text("stale")]])
            .unwrap();
        workbook.create_table("emp01_this").unwrap();
        // Both legacy and canonical exist: the legacy table is left alone
        workbook.create_table(LEGACY_SUMMARY_PREVIOUS).unwrap();
        workbook.create_table(SUMMARY_PREVIOUS_TABLE).unwrap();

        let report = views().refresh(&mut workbook, now()).unwrap();

        assert!(!workbook.has_table(LEGACY_SUMMARY_CURRENT));
        assert!(!workbook.has_table("emp01_this"));
        assert_eq!(
            report.tables,
            vec![
                SUMMARY_CURRENT_TABLE,
                SUMMARY_PREVIOUS_TABLE,
                "emp01_ThisMonth",
                "emp01_PrevMonth",
                LEGACY_SUMMARY_PREVIOUS,
                RAW,
            ]
        );
        let summary = workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap();
        assert_eq!(summary[0][0], CellValue::text("EmpID"));
    }

    #[test]
    fn test_refresh_keeps_unrelated_tables_before_ledger() {
        let mut workbook = Workbook::new();
        workbook.create_table("Notes").unwrap();
        workbook.create_table(RAW).unwrap();
        workbook.write_range(RAW, 0, 0, &ledger_grid(&sample_rows())).unwrap();
        workbook.create_table("Archive").unwrap();

        let report = views().refresh(&mut workbook, now()).unwrap();
        assert_eq!(
            report.tables,
            vec![
                SUMMARY_CURRENT_TABLE,
                SUMMARY_PREVIOUS_TABLE,
                "emp01_ThisMonth",
                "emp01_PrevMonth",
                "Notes",
                "Archive",
                RAW,
            ]
        );
    }

    #[test]
    fn test_refresh_with_header_only_ledger() {
        let mut workbook = workbook_with_ledger(&[]);
        let report = views().refresh(&mut workbook, now()).unwrap();

        assert_eq!(report.records, 0);
        assert_eq!(report.tables, vec![SUMMARY_CURRENT_TABLE, SUMMARY_PREVIOUS_TABLE, RAW]);
        assert_eq!(workbook.read_all(SUMMARY_CURRENT_TABLE).unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_without_ledger_fails() {
        let mut workbook = Workbook::new();
        match views().refresh(&mut workbook, now()) {
            Err(ViewError::LedgerNotFound(name)) => assert_eq!(name, RAW),
            other => panic!("expected LedgerNotFound, got {:?}", other),
        }
        assert!(workbook.table_names().is_empty());
    }

    #[test]
    fn test_refresh_reports_missing_column() {
        let mut workbook = Workbook::new();
        workbook.create_table(RAW).unwrap();
        workbook
            .write_range(
                RAW,
                0,
                0,
                &[
                    vec![CellValue::text("id"), CellValue::text("date")],
                    vec![CellValue::text("r1"), CellValue::text("2024-05-01")],
                ],
            )
            .unwrap();
        assert!(matches!(
            views().refresh(&mut workbook, now()),
            Err(ViewError::MissingColumn(column)) if column == "emp"
        ));
    }

    // --- Materializer ---

    #[test]
    fn test_materialize_empty_rows_clears_everything() {
        let mut workbook = Workbook::new();
        workbook.create_table("t").unwrap();
        workbook
            .write_range("t", 0, 0, &[vec![CellValue::text("old")], vec![CellValue::int(1)]])
            .unwrap();
        workbook.set_row_bold("t", 0).unwrap();

        materialize(&mut workbook, "t", &[], &SUMMARY_LAYOUT).unwrap();

        let table = workbook.table("t").unwrap();
        assert!(table.rows.is_empty());
        assert!(table.bold_rows.is_empty());
        assert!(table.number_formats.is_empty());
        assert_eq!(table.column_widths.len(), SUMMARY_LAYOUT.widths.len());
    }

    #[test]
    fn test_materialize_creates_and_pads() {
        let mut workbook = Workbook::new();
        let rows = vec![
            vec![CellValue::text("h")],
            vec![CellValue::text("a"), CellValue::int(2)],
        ];
        materialize(&mut workbook, "new", &rows, &DETAIL_LAYOUT).unwrap();

        let grid = workbook.read_all("new").unwrap();
        assert_eq!(grid.len(), 2);
        assert!(grid.iter().all(|row| row.len() == DETAIL_LAYOUT.columns));
        assert_eq!(workbook.table("new").unwrap().frozen_rows, 1);
    }
}
