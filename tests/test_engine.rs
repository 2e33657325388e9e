//! Integration test: full plan execution (plan → pipeline → split → train → score)

use autoplan::prelude::*;
use polars::prelude::*;

fn create_people_dataset() -> DataFrame {
    df!(
        "age" => [Some(25.0), None, Some(35.0), Some(45.0), Some(30.0), Some(50.0), Some(28.0), Some(40.0), Some(33.0), Some(38.0)],
        "city" => ["Oslo", "Bergen", "Oslo", "Tromso", "Bergen", "Oslo", "Tromso", "Bergen", "Oslo", "Tromso"],
        "income" => [42.0, 38.0, 55.0, 61.0, 47.0, 70.0, 40.0, 58.0, 51.0, 56.0]
    )
    .unwrap()
}

fn create_blobs() -> DataFrame {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..15 {
        let jitter = (i as f64 * 0.37).sin() * 0.2;
        x.push(jitter);
        y.push(jitter * 0.5);
        x.push(8.0 + jitter);
        y.push(8.0 - jitter);
    }
    df!("x" => x, "y" => y).unwrap()
}

const PEOPLE_PLAN: &str = r#"{
    "overview": "Predict income from age and city",
    "transformations": [
        {"columns": ["age"], "transformer": "SimpleImputer", "parameters": {"strategy": "median"}},
        {"columns": ["city"], "transformer": "OrdinalEncoder", "parameters": {}}
    ],
    "suggested_regression_models": [
        {"model_name": "LinearRegression", "hyperparameters": {}}
    ]
}"#;

fn engine() -> PlanEngine {
    PlanEngine::builtin(EngineConfig::new().with_random_seed(42))
}

#[test]
fn test_end_to_end_regression() {
    let plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();
    let input = DatasetInput::new(create_people_dataset()).with_target("income");
    let report = engine().execute(&plan, input, TaskKind::Regression).unwrap();

    assert_eq!(report.steps.len(), 2);
    assert!(report.steps.iter().all(|s| s.is_applied()));
    assert_eq!(report.residual_missing(), 0);

    let age = report.transformed.column("age").unwrap().as_materialized_series().f64().unwrap().clone();
    assert_eq!(age.get(1), Some(35.0));

    let city = report.transformed.column("city").unwrap().as_materialized_series().f64().unwrap().clone();
    assert!(city.into_iter().flatten().all(|c| c.fract() == 0.0 && (0.0..3.0).contains(&c)));

    assert_eq!(report.candidates.len(), 1);
    let candidate = &report.candidates[0];
    assert_eq!(candidate.model_name, "LinearRegression");
    assert!(candidate.is_success());
    assert!(candidate.score.value().unwrap().is_finite());
}

#[test]
fn test_clustering_with_unscorable_candidate() {
    let plan = AnalysisPlan {
        transformations: vec![TransformationStep::new("StandardScaler", ["x", "y"])],
        suggested_clustering_models: Some(vec![
            ModelSpec::new("DBSCAN").with_param("eps", 0.5).with_param("min_samples", 3),
            ModelSpec::new("KMeans").with_param("n_clusters", 2).with_param("random_state", 0),
            ModelSpec::new("AgglomerativeClustering").with_param("n_clusters", 2),
        ]),
        ..Default::default()
    };
    let report = engine()
        .execute(&plan, DatasetInput::new(create_blobs()), TaskKind::Clustering)
        .unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert!(report.candidates.iter().all(|c| c.is_success()));
    assert!(matches!(report.candidates[0].score, CandidateScore::Unavailable { .. }));
    assert!(report.candidates[1].score.value().unwrap() <= 0.0);
    assert!(report.candidates[2].score.value().is_none());
    assert!(report.summary().contains("unavailable"));
}

#[test]
fn test_classification_with_string_target() {
    let df = df!(
        "f" => (0..30).map(|i| i as f64).collect::<Vec<_>>(),
        "label" => (0..30).map(|i| if i < 15 { "low" } else { "high" }).collect::<Vec<_>>()
    )
    .unwrap();
    let plan = AnalysisPlan {
        suggested_classification_models: Some(vec![
            ModelSpec::new("KNeighborsClassifier").with_param("n_neighbors", 3),
            ModelSpec::new("RandomForestClassifier")
                .with_param("n_estimators", 10)
                .with_param("random_state", 1),
        ]),
        ..Default::default()
    };
    let input = DatasetInput::new(df).with_target("label");
    let report = engine().execute(&plan, input, TaskKind::Classification).unwrap();

    for candidate in &report.candidates {
        let accuracy = candidate.score.value().unwrap();
        assert!((0.0..=1.0).contains(&accuracy), "{}: {}", candidate.model_name, accuracy);
    }
    assert!(report.candidates[0].score.value().unwrap() >= 0.8);
}

#[test]
fn test_only_the_task_list_is_used() {
    let plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();
    let input = DatasetInput::new(create_people_dataset()).with_target("income");
    let report = engine().execute(&plan, input, TaskKind::Classification).unwrap();

    assert!(report.candidates.is_empty());
    assert_eq!(report.steps.len(), 2);
}

#[test]
fn test_wrong_catalogue_and_bad_hyperparameters_stay_on_candidate() {
    let mut plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();
    plan.suggested_regression_models = Some(vec![
        ModelSpec::new("KMeans"),
        ModelSpec::new("Ridge").with_param("alpha", "strong"),
        ModelSpec::new("Ridge").with_param("alpha", 0.5),
    ]);
    let input = DatasetInput::new(create_people_dataset()).with_target("income");
    let report = engine().execute(&plan, input, TaskKind::Regression).unwrap();

    let kinds: Vec<Option<ErrorKind>> = report
        .candidates
        .iter()
        .map(|c| c.error.as_ref().map(|e| e.kind))
        .collect();
    assert_eq!(kinds, vec![Some(ErrorKind::UnknownModel), Some(ErrorKind::Construction), None]);
}

#[test]
fn test_structural_errors_abort() {
    let plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();

    let err = engine()
        .execute(&plan, DatasetInput::new(create_people_dataset()), TaskKind::Regression)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingTarget);

    let input = DatasetInput::new(create_people_dataset()).with_target("salary");
    let err = engine().execute(&plan, input, TaskKind::Regression).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownColumn);

    assert!(matches!(
        AnalysisPlan::from_json("{\"transformations\": 3}"),
        Err(PlanError::PlanParse(_))
    ));
}

#[test]
fn test_unencoded_text_column_fails_every_candidate() {
    let mut plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();
    plan.transformations.truncate(1);
    plan.suggested_regression_models = Some(vec![ModelSpec::new("LinearRegression"), ModelSpec::new("Lasso")]);
    let input = DatasetInput::new(create_people_dataset()).with_target("income");
    let report = engine().execute(&plan, input, TaskKind::Regression).unwrap();

    assert_eq!(report.candidates.len(), 2);
    for candidate in &report.candidates {
        assert_eq!(candidate.error.as_ref().unwrap().kind, ErrorKind::Data);
        assert!(candidate.error.as_ref().unwrap().message.contains("city"));
    }
}

#[test]
fn test_report_serializes() {
    let plan = AnalysisPlan::from_json(PEOPLE_PLAN).unwrap();
    let input = DatasetInput::new(create_people_dataset()).with_target("income");
    let report = engine().execute(&plan, input, TaskKind::Regression).unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["steps"][0]["status"], "applied");
    assert_eq!(json["candidates"][0]["model_name"], "LinearRegression");
    assert!(json["candidates"][0]["score"].is_number());
    assert_eq!(json["missing_before"][0]["missing"], 1);
}
