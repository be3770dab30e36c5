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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Smoke Class", "gradeId": "grade-7" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "classId": class_id, "name": "Amara" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "classId": class_id }),
    );

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({ "gradeId": "grade-7", "name": "Mathematics" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.list",
        json!({ "gradeId": "grade-7" }),
    );

    let sub_exam = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "subExams.create",
        json!({
            "gradeId": "grade-7",
            "subjectId": subject_id,
            "examType": "quiz",
            "title": "Quiz 1",
            "maxScore": 10.0
        }),
    );
    let sub_exam_id = sub_exam
        .get("subExamId")
        .and_then(|v| v.as_str())
        .expect("subExamId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "subExams.list",
        json!({ "gradeId": "grade-7", "subjectId": subject_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "scores.record",
        json!({
            "studentId": student_id,
            "subExamId": sub_exam_id,
            "termId": "t1",
            "score": 8.0
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "roster.term",
        json!({ "classId": class_id, "termId": "t1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "roster.semester",
        json!({ "classId": class_id, "term1Id": "t1", "term2Id": "t2" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "reports.rosterCsv",
        json!({ "classId": class_id, "termId": "t1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "reports.semesterCsv",
        json!({ "classId": class_id, "term1Id": "t1", "term2Id": "t2" }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "grid.open",
        json!({ "classId": class_id, "subjectId": subject_id, "termId": "t1" }),
    );
    assert_eq!(opened.get("seededCells").and_then(|v| v.as_i64()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "grid.edit",
        json!({ "studentId": student_id, "subExamId": sub_exam_id, "value": 9.0, "nowMs": 0 }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "18", "grid.tick", json!({ "nowMs": 2000 }));
    let _ = request_ok(&mut stdin, &mut reader, "19", "grid.status", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "20", "grid.live", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "21", "grid.saveAll", json!({}));
    let closed = request_ok(&mut stdin, &mut reader, "22", "grid.close", json!({}));
    assert_eq!(closed.get("closed").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
}
