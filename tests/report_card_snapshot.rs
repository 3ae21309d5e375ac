use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn assert_approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("expected number, got {}", v));
    assert!(
        (got - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        got
    );
}

fn grade(student: &str, subject: &str, seq: &str, score: f64) -> serde_json::Value {
    json!({ "studentId": student, "subjectId": subject, "sequenceId": seq, "score": score })
}

fn absent(student: &str, subject: &str, seq: &str) -> serde_json::Value {
    json!({ "studentId": student, "subjectId": subject, "sequenceId": seq, "isAbsent": true })
}

fn snapshot(
    subjects: serde_json::Value,
    students: &[&str],
    grades: Vec<serde_json::Value>,
) -> serde_json::Value {
    let students: Vec<serde_json::Value> = students
        .iter()
        .enumerate()
        .map(|(i, id)| json!({ "id": id, "displayName": id, "order": i }))
        .collect();
    json!({
        "classroomId": "form-3a",
        "termId": "t1",
        "sequenceIds": ["seq1", "seq2"],
        "subjects": subjects,
        "students": students,
        "grades": grades,
    })
}

#[test]
fn snapshot_ties_share_rank_and_leave_a_gap() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let snap = snapshot(
        json!([{ "id": "math", "coefficient": 1 }]),
        &["a", "b", "c"],
        vec![
            grade("a", "math", "seq1", 15.0),
            grade("b", "math", "seq1", 14.0),
            grade("b", "math", "seq2", 16.0),
            grade("c", "math", "seq1", 10.0),
        ],
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "reportCard.computeSnapshot",
        json!({ "snapshot": snap }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    let card = &resp["result"];
    assert_eq!(card["globalRanks"]["a"]["rank"], json!(1));
    assert_eq!(card["globalRanks"]["b"]["rank"], json!(1));
    assert_eq!(card["globalRanks"]["c"]["rank"], json!(3));
    assert_approx(&card["summary"]["math"]["min"], 10.0);
    assert_approx(&card["summary"]["math"]["max"], 15.0);
    assert_approx(&card["summary"]["math"]["average"], 40.0 / 3.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn snapshot_weighted_average_and_absence_rules() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let snap = snapshot(
        json!([
            { "id": "math", "name": "Math", "coefficient": 4 },
            { "id": "art", "name": "Art", "coefficient": 1 },
            { "id": "music", "name": "Music", "coefficient": 2 }
        ]),
        &["a", "b"],
        vec![
            grade("a", "math", "seq1", 12.0),
            grade("a", "math", "seq2", 12.0),
            grade("a", "art", "seq1", 18.0),
            absent("a", "music", "seq1"),
            absent("a", "music", "seq2"),
            grade("b", "music", "seq1", 9.0),
        ],
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "reportCard.computeSnapshot",
        json!({ "snapshot": snap }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    let card = &resp["result"];
    // Music is all-absent for a: excluded, so (12*4 + 18*1) / 5.
    assert_approx(&card["studentsReport"]["a"]["global"]["average"], 13.2);
    let music = card["studentsReport"]["a"]["studentCourses"]
        .as_array()
        .expect("courses")
        .iter()
        .find(|c| c["subjectId"] == json!("music"))
        .expect("music row");
    assert!(music["average"].is_null());
    assert_eq!(card["summary"]["music"]["gradedCount"], json!(1));
    assert_approx(&card["summary"]["music"]["min"], 9.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn snapshot_empty_roster_yields_empty_ranks() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let snap = snapshot(json!([{ "id": "math", "coefficient": 2 }]), &[], Vec::new());
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "reportCard.computeSnapshot",
        json!({ "snapshot": snap }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    let card = &resp["result"];
    assert_eq!(card["globalRanks"], json!({}));
    assert_eq!(card["studentsReport"], json!({}));
    assert!(card["classStats"]["successRate"].is_null());
    assert!(card["summary"]["math"]["average"].is_null());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn snapshot_skips_inconsistent_grades_and_rejects_bad_coefficients() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let snap = snapshot(
        json!([{ "id": "math", "coefficient": 1 }]),
        &["a"],
        vec![
            grade("a", "math", "seq1", 11.0),
            grade("ghost", "math", "seq1", 19.0),
            grade("a", "physics", "seq1", 19.0),
            grade("a", "math", "seq3", 19.0),
        ],
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "reportCard.computeSnapshot",
        json!({ "snapshot": snap }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    let card = &resp["result"];
    assert_approx(&card["globalRanks"]["a"]["average"], 11.0);
    let reasons: Vec<&str> = card["skippedGrades"]
        .as_array()
        .expect("skipped")
        .iter()
        .filter_map(|s| s["reason"].as_str())
        .collect();
    assert_eq!(
        reasons,
        vec!["unknown_student", "unknown_subject", "unknown_sequence"]
    );

    // A wider scale accepts scores the default /20 scale would skip.
    let snap = snapshot(
        json!([{ "id": "math", "coefficient": 1 }]),
        &["a"],
        vec![grade("a", "math", "seq1", 75.0)],
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "reportCard.computeSnapshot",
        json!({ "snapshot": snap, "grading": { "scaleMax": 100, "passMark": 50 } }),
    );
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    assert_approx(&resp["result"]["globalRanks"]["a"]["average"], 75.0);

    let bad = snapshot(json!([{ "id": "math", "coefficient": -2 }]), &["a"], Vec::new());
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "reportCard.computeSnapshot",
        json!({ "snapshot": bad }),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "reportCard.computeSnapshot",
        json!({ "snapshot": { "classroomId": "x" } }),
    );
    assert_eq!(resp["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}
