use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

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

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn result_str(resp: &serde_json::Value, key: &str) -> String {
    assert_eq!(resp["ok"], json!(true), "{}", resp);
    resp["result"][key]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} in {}", key, resp))
        .to_string()
}

#[test]
fn router_answers_every_family_and_reports_unknown_methods() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
    assert!(health["result"]["workspacePath"].is_null());

    let unknown = request(&mut stdin, &mut reader, "2", "reportCard.explode", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    // Listing without a workspace is empty; writing needs one.
    let listed = request(&mut stdin, &mut reader, "3", "classrooms.list", json!({}));
    assert_eq!(listed["result"]["classrooms"], json!([]));
    for (i, method) in [
        "classrooms.create",
        "students.list",
        "subjects.create",
        "terms.create",
        "grades.upsert",
        "reportCard.compute",
        "settings.get",
    ]
    .iter()
    .enumerate()
    {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("nw{}", i),
            method,
            json!({ "name": "x" }),
        );
        assert_eq!(error_code(&resp), Some("no_workspace"), "{}", method);
    }

    // Malformed lines get an error reply and do not kill the daemon.
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let reply: serde_json::Value = serde_json::from_str(line.trim()).expect("json reply");
    assert_eq!(error_code(&reply), Some("bad_json"));

    let health = request(&mut stdin, &mut reader, "4", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn writes_are_validated_before_touching_the_store() {
    let workspace = temp_dir("reportcardd-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["result"]["grading"]["scaleMax"], json!(20.0));

    let c1 = request(&mut stdin, &mut reader, "2", "classrooms.create", json!({ "name": "Form 1" }));
    let c1 = result_str(&c1, "classroomId");
    let c2 = request(&mut stdin, &mut reader, "3", "classrooms.create", json!({ "name": "Form 2" }));
    let c2 = result_str(&c2, "classroomId");

    let blank = request(&mut stdin, &mut reader, "4", "classrooms.create", json!({ "name": "  " }));
    assert_eq!(error_code(&blank), Some("bad_params"));

    let s1 = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classroomId": c1, "lastName": "Ade" }),
    );
    let s1 = result_str(&s1, "studentId");
    let outsider = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "classroomId": c2, "lastName": "Out" }),
    );
    let outsider = result_str(&outsider, "studentId");

    let neg = request(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "classroomId": c1, "courseName": "Math", "coefficient": -1 }),
    );
    assert_eq!(error_code(&neg), Some("bad_params"));
    let math = request(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.create",
        json!({ "classroomId": c1, "courseName": "Math" }),
    );
    assert_eq!(math["result"]["coefficient"], json!(1.0));
    let math = result_str(&math, "subjectId");

    let too_many = request(
        &mut stdin,
        &mut reader,
        "9",
        "terms.create",
        json!({ "name": "Year", "sequences": ["1", "2", "3", "4", "5", "6", "7"] }),
    );
    assert_eq!(error_code(&too_many), Some("bad_params"));
    let term = request(
        &mut stdin,
        &mut reader,
        "10",
        "terms.create",
        json!({ "name": "T1", "sequences": ["Test 1", "Test 2"] }),
    );
    let term_id = result_str(&term, "termId");
    let seq1 = term["result"]["sequences"][0]["id"]
        .as_str()
        .expect("seq id")
        .to_string();

    let over = request(
        &mut stdin,
        &mut reader,
        "11",
        "grades.upsert",
        json!({
            "subjectId": math,
            "sequenceId": seq1,
            "entries": [{ "studentId": s1, "score": 12 }, { "studentId": s1, "score": 21 }]
        }),
    );
    assert_eq!(error_code(&over), Some("bad_params"));
    assert_eq!(over["error"]["details"]["index"], json!(1));

    let foreign = request(
        &mut stdin,
        &mut reader,
        "12",
        "grades.upsert",
        json!({
            "subjectId": math,
            "sequenceId": seq1,
            "entries": [{ "studentId": outsider, "score": 12 }]
        }),
    );
    assert_eq!(error_code(&foreign), Some("bad_params"));

    // Nothing from the rejected batches was written.
    let listed = request(
        &mut stdin,
        &mut reader,
        "13",
        "grades.list",
        json!({ "classroomId": c1, "termId": term_id }),
    );
    assert_eq!(listed["result"]["grades"], json!([]));

    let bad_setting = request(
        &mut stdin,
        &mut reader,
        "14",
        "settings.update",
        json!({ "grading": { "passMark": 30 } }),
    );
    assert_eq!(error_code(&bad_setting), Some("bad_params"));

    let both = request(
        &mut stdin,
        &mut reader,
        "15",
        "reportCard.compute",
        json!({ "classroomId": c1, "termId": term_id, "sequenceId": seq1 }),
    );
    assert_eq!(error_code(&both), Some("bad_params"));

    let missing_term = request(
        &mut stdin,
        &mut reader,
        "16",
        "reportCard.compute",
        json!({ "classroomId": c1, "termId": "nope" }),
    );
    assert_eq!(error_code(&missing_term), Some("not_found"));

    let wrong_class = request(
        &mut stdin,
        &mut reader,
        "17",
        "reportCard.student",
        json!({ "classroomId": c1, "termId": term_id, "studentId": outsider }),
    );
    assert_eq!(error_code(&wrong_class), Some("not_found"));

    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "grades.upsert",
        json!({
            "subjectId": math,
            "sequenceId": seq1,
            "entries": [{ "studentId": s1, "score": 12 }]
        }),
    );
    let deleted = request(
        &mut stdin,
        &mut reader,
        "19",
        "classrooms.delete",
        json!({ "classroomId": c1 }),
    );
    assert_eq!(deleted["ok"], json!(true), "{}", deleted);
    let gone = request(
        &mut stdin,
        &mut reader,
        "20",
        "reportCard.compute",
        json!({ "classroomId": c1, "termId": term_id }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));

    let remaining = request(&mut stdin, &mut reader, "21", "classrooms.list", json!({}));
    let names: Vec<&str> = remaining["result"]["classrooms"]
        .as_array()
        .expect("classrooms")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Form 2"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rejected_updates_leave_stored_state_untouched() {
    let workspace = temp_dir("reportcardd-atomic");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request(&mut stdin, &mut reader, "2", "classrooms.create", json!({ "name": "Form 1" }));
    let class = result_str(&class, "classroomId");
    let student = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classroomId": class, "lastName": "Abena", "firstName": "Ama" }),
    );
    let student = result_str(&student, "studentId");

    // A bad field anywhere in the patch rejects all of it.
    let rejected = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.update",
        json!({ "studentId": student, "patch": { "firstName": "CHANGED", "lastName": "" } }),
    );
    assert_eq!(error_code(&rejected), Some("bad_params"));
    let listed = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "classroomId": class }),
    );
    assert_eq!(listed["result"]["students"][0]["firstName"], json!("Ama"));
    assert_eq!(listed["result"]["students"][0]["lastName"], json!("Abena"));

    let accepted = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": student, "patch": { "firstName": "Efua", "lastName": "Mensah" } }),
    );
    assert_eq!(accepted["ok"], json!(true), "{}", accepted);
    let listed = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "classroomId": class }),
    );
    assert_eq!(listed["result"]["students"][0]["displayName"], json!("Mensah, Efua"));

    let math = request(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.create",
        json!({ "classroomId": class, "courseName": "Math" }),
    );
    let math = result_str(&math, "subjectId");
    let term = request(&mut stdin, &mut reader, "9", "terms.create", json!({ "name": "T1" }));
    let term_id = result_str(&term, "termId");
    let seq1 = term["result"]["sequences"][0]["id"]
        .as_str()
        .expect("seq id")
        .to_string();
    let written = request(
        &mut stdin,
        &mut reader,
        "10",
        "grades.upsert",
        json!({
            "subjectId": math,
            "sequenceId": seq1,
            "entries": [{ "studentId": student, "score": 18 }]
        }),
    );
    assert_eq!(written["ok"], json!(true), "{}", written);

    // The scale cannot shrink below a grade already on record.
    let shrunk = request(
        &mut stdin,
        &mut reader,
        "11",
        "settings.update",
        json!({ "grading": { "scaleMax": 10, "passMark": 5 } }),
    );
    assert_eq!(error_code(&shrunk), Some("bad_params"));
    assert_eq!(shrunk["error"]["details"]["highestScore"], json!(18.0));
    let settings = request(&mut stdin, &mut reader, "12", "settings.get", json!({}));
    assert_eq!(settings["result"]["grading"]["scaleMax"], json!(20.0));

    let card = request(
        &mut stdin,
        &mut reader,
        "13",
        "reportCard.compute",
        json!({ "classroomId": class, "termId": term_id }),
    );
    assert_eq!(card["ok"], json!(true), "{}", card);
    assert_eq!(card["result"]["skippedGrades"], json!([]));
    assert_eq!(
        card["result"]["studentsReport"][&student]["global"]["average"],
        json!(18.0)
    );

    let exact = request(
        &mut stdin,
        &mut reader,
        "14",
        "settings.update",
        json!({ "grading": { "scaleMax": 18, "passMark": 9 } }),
    );
    assert_eq!(exact["ok"], json!(true), "{}", exact);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
