mod test_support;

use serde_json::json;
use test_support::{
    create_student, create_subject, mark, request_err, request_ok, spawn_sidecar, temp_dir,
};

#[test]
fn course_plan_defaults_persist_and_validate() {
    let workspace = temp_dir("attendanced-setup-plan");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        defaults["coursePlan"],
        json!({ "workingDays": 30, "periodsPerDay": 4, "termStart": null, "termEnd": null })
    );
    assert_eq!(defaults["fallback"]["strategy"], "none");
    assert_eq!(defaults["activeFallback"], "none");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "coursePlan",
            "patch": {
                "workingDays": 60,
                "periodsPerDay": 6,
                "termStart": "2025-08-01",
                "termEnd": "2025-11-30"
            }
        }),
    );

    let bad_patches = vec![
        json!({ "section": "coursePlan", "patch": { "workingDays": 0 } }),
        json!({ "section": "coursePlan", "patch": { "periodsPerDay": "6" } }),
        json!({ "section": "coursePlan", "patch": { "termEnd": "2025-07-01" } }),
        json!({ "section": "coursePlan", "patch": { "holidays": [] } }),
        json!({ "section": "grading", "patch": {} }),
        json!({ "section": "coursePlan" }),
    ];
    for (i, params) in bad_patches.into_iter().enumerate() {
        let id = format!("bad-{}", i);
        let code = request_err(&mut stdin, &mut reader, &id, "setup.update", params);
        assert_eq!(code, "bad_params", "patch {}", i);
    }

    let sid = create_student(&mut stdin, &mut reader, "4", "Saravana", "CSE1001", "CSE", "A");
    let sub = create_subject(&mut stdin, &mut reader, "5", "Data Structures", "CSE", "A");

    // Period 6 is valid once the plan has six periods per day.
    let _ = mark(&mut stdin, &mut reader, "6", &sid, &sub, "2025-09-01", 6, "present");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({
            "studentId": sid,
            "subjectId": sub,
            "date": "2025-12-01",
            "period": 1,
            "status": "present"
        }),
    );
    assert_eq!(code, "invalid_filter", "date after termEnd");

    drop(stdin);
    let _ = child.wait();

    // Settings survive a restart.
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let saved = request_ok(&mut stdin, &mut reader, "9", "setup.get", json!({}));
    assert_eq!(saved["coursePlan"]["workingDays"], 60);
    assert_eq!(saved["coursePlan"]["termStart"], "2025-08-01");
    let overall = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "summary.overall",
        json!({ "studentId": sid }),
    );
    assert_eq!(overall["periods"]["totalPeriods"], 360);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn fallback_strategy_is_validated_before_it_is_saved() {
    let workspace = temp_dir("attendanced-setup-fallback");
    let fixture = workspace.join("offline.json");
    std::fs::write(
        &fixture,
        serde_json::to_string(&json!({
            "students": [{
                "id": 1, "name": "Offline Student", "regNo": "OFF001",
                "department": "CSE", "section": "A"
            }],
            "subjects": [],
            "attendance": []
        }))
        .expect("fixture json"),
    )
    .expect("write fixture");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "fallback",
            "patch": { "strategy": "fixture", "fixturePath": "missing.json" }
        }),
    );
    assert_eq!(code, "fixture_load_failed");
    let current = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(current["fallback"]["strategy"], "none");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "fallback", "patch": { "strategy": "cache" } }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({
            "section": "fallback",
            "patch": { "strategy": "fixture", "fixturePath": "offline.json" }
        }),
    );
    let current = request_ok(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    assert_eq!(current["activeFallback"], "fixture");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "fallback", "patch": { "strategy": "lastGood" } }),
    );
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["fallback"], "lastGood");

    drop(stdin);
    let _ = child.wait();
}
