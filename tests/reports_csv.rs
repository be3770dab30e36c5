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

struct Fixture {
    class_id: String,
    quiz_id: String,
    mid_id: String,
}

/// One class, one student, Mathematics with a quiz(10) and a mid exam(20).
fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    student_name: &str,
) -> Fixture {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        stdin,
        reader,
        "s2",
        "classes.create",
        json!({ "name": "7B", "gradeId": "grade-7" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "students.create",
        json!({ "classId": class_id, "name": student_name }),
    );
    let subject_id = request_ok(
        stdin,
        reader,
        "s4",
        "subjects.create",
        json!({ "gradeId": "grade-7", "name": "Mathematics" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();

    let quiz_id = request_ok(
        stdin,
        reader,
        "s5",
        "subExams.create",
        json!({ "gradeId": "grade-7", "subjectId": subject_id, "examType": "quiz", "maxScore": 10.0 }),
    )["subExamId"]
        .as_str()
        .expect("subExamId")
        .to_string();
    let mid_id = request_ok(
        stdin,
        reader,
        "s6",
        "subExams.create",
        json!({ "gradeId": "grade-7", "subjectId": subject_id, "examType": "mid_exam", "maxScore": 20.0 }),
    )["subExamId"]
        .as_str()
        .expect("subExamId")
        .to_string();

    Fixture {
        class_id,
        quiz_id,
        mid_id,
    }
}

fn student_id(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
) -> String {
    let listed = request_ok(
        stdin,
        reader,
        "sid",
        "students.list",
        json!({ "classId": class_id }),
    );
    listed["students"][0]["studentId"]
        .as_str()
        .expect("student id")
        .to_string()
}

#[test]
fn term_csv_lays_out_subject_columns_and_the_rank_label() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "gradebook-csv-term", "Asha");
    let asha = student_id(&mut stdin, &mut reader, &fx.class_id);

    // quiz 8/10, mid 16/20: 24/30 = 80%.
    for (i, (sub_exam, score)) in [(&fx.quiz_id, 8.0), (&fx.mid_id, 16.0)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "scores.record",
            json!({ "studentId": asha, "subExamId": sub_exam, "termId": "t1", "score": score }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.rosterCsv",
        json!({ "classId": fx.class_id, "termId": "t1" }),
    );
    let csv = result["csv"].as_str().expect("csv string");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        "Student,Mathematics,Mathematics Grade,Average,Grade,Rank"
    );
    assert_eq!(lines[1], "Asha,24,B,80,B,1st");
}

#[test]
fn semester_csv_emits_three_dimension_lines_per_student() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "gradebook-csv-semester", "Asha");
    let asha = student_id(&mut stdin, &mut reader, &fx.class_id);

    for (i, (term, score)) in [("t1", 9.0), ("t2", 7.0)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "scores.record",
            json!({ "studentId": asha, "subExamId": fx.quiz_id, "termId": term, "score": score }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.semesterCsv",
        json!({ "classId": fx.class_id, "term1Id": "t1", "term2Id": "t2" }),
    );
    let csv = result["csv"].as_str().expect("csv string");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4, "header plus one line per dimension");
    assert_eq!(lines[0], "Student,Dimension,Mathematics,Score,Grade,Rank");
    assert!(lines[1].starts_with("Asha,Term 1,9,"));
    assert!(lines[2].starts_with("Asha,Term 2,7,"));
    assert!(lines[3].starts_with("Asha,Average,8,"));
}

#[test]
fn student_names_with_commas_are_quoted() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "gradebook-csv-quoting", "Okoye, Ada");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.rosterCsv",
        json!({ "classId": fx.class_id, "termId": "t1" }),
    );
    let csv = result["csv"].as_str().expect("csv string");
    assert!(
        csv.contains("\"Okoye, Ada\""),
        "comma-bearing name must be quoted: {}",
        csv
    );
}

#[test]
fn deleting_a_sub_exam_orphans_its_scores_without_breaking_reports() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, "gradebook-csv-orphans", "Asha");
    let asha = student_id(&mut stdin, &mut reader, &fx.class_id);

    for (i, (sub_exam, score)) in [(&fx.quiz_id, 8.0), (&fx.mid_id, 15.0)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "scores.record",
            json!({ "studentId": asha, "subExamId": sub_exam, "termId": "t1", "score": score }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subExams.delete",
        json!({ "subExamId": fx.quiz_id }),
    );

    // The quiz score is now unresolvable; the roster excludes it and keeps
    // the mid exam.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.term",
        json!({ "classId": fx.class_id, "termId": "t1" }),
    );
    let r = &result["roster"]["rows"][0];
    let math = &r["subjects"][0];
    assert_eq!(math["total"].as_f64(), Some(15.0));
    assert_eq!(math["maxTotal"].as_f64(), Some(20.0));
    assert_eq!(math["contributingCount"].as_i64(), Some(1));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.rosterCsv",
        json!({ "classId": fx.class_id, "termId": "t1" }),
    );
    assert!(result["csv"].as_str().expect("csv").contains("Asha,15,C,75,C,1st"));
}
