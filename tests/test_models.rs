//! Integration test: every catalogued model through the registry

use autoplan::plan::{ModelSpec, TaskKind};
use autoplan::training::{ModelRegistry, TrainingData, TrainingExecutor};
use ndarray::{Array1, Array2};
use std::sync::Arc;

fn create_regression_data() -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((60, 2), |(i, j)| {
        let t = i as f64 / 10.0;
        if j == 0 { t } else { (t * 1.3).cos() }
    });
    let y = x.rows().into_iter().map(|r| 0.5 * r[0] + 0.2 * r[1]).collect();
    (x, y)
}

fn create_classification_data() -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((60, 2), |(i, j)| {
        let offset = if i % 2 == 0 { 0.0 } else { 4.0 };
        offset + ((i * (j + 3)) as f64 * 0.61).sin() * 0.5
    });
    let y = (0..60).map(|i| (i % 2) as f64).collect();
    (x, y)
}

fn supervised(x: Array2<f64>, y: Array1<f64>) -> TrainingData {
    TrainingData::Supervised {
        x_train: x.clone(),
        y_train: y.clone(),
        x_test: x,
        y_test: y,
    }
}

fn executor() -> TrainingExecutor {
    TrainingExecutor::new(Arc::new(ModelRegistry::builtin()))
}

#[test]
fn test_all_regressors_fit_and_score() {
    let (x, y) = create_regression_data();
    let specs = vec![
        ModelSpec::new("LinearRegression"),
        ModelSpec::new("Ridge").with_param("alpha", 0.1),
        ModelSpec::new("Lasso").with_param("alpha", 0.001),
        ModelSpec::new("RandomForestRegressor")
            .with_param("n_estimators", 20)
            .with_param("random_state", 0),
        ModelSpec::new("GradientBoostingRegressor")
            .with_param("n_estimators", 50)
            .with_param("random_state", 0),
        ModelSpec::new("SVR").with_param("kernel", "linear").with_param("C", 10.0),
    ];
    let outcomes = executor().run(TaskKind::Regression, &specs, &supervised(x, y));

    assert_eq!(outcomes.len(), specs.len());
    for outcome in &outcomes {
        assert!(outcome.is_success(), "{}: {:?}", outcome.model_name, outcome.error);
        let r2 = outcome.score.value().unwrap();
        assert!(r2 > 0.8, "{} scored {}", outcome.model_name, r2);
    }
}

#[test]
fn test_all_classifiers_fit_and_score() {
    let (x, y) = create_classification_data();
    let specs = vec![
        ModelSpec::new("LogisticRegression"),
        ModelSpec::new("RandomForestClassifier")
            .with_param("n_estimators", 20)
            .with_param("random_state", 0),
        ModelSpec::new("GradientBoostingClassifier")
            .with_param("n_estimators", 30)
            .with_param("random_state", 0),
        ModelSpec::new("SVC"),
        ModelSpec::new("KNeighborsClassifier"),
    ];
    let outcomes = executor().run(TaskKind::Classification, &specs, &supervised(x, y));

    for outcome in &outcomes {
        assert!(outcome.is_success(), "{}: {:?}", outcome.model_name, outcome.error);
        let accuracy = outcome.score.value().unwrap();
        assert!(accuracy >= 0.95, "{} scored {}", outcome.model_name, accuracy);
    }
}

#[test]
fn test_all_clusterers_fit() {
    let (x, _) = create_classification_data();
    let specs = vec![
        ModelSpec::new("KMeans").with_param("n_clusters", 2).with_param("random_state", 3),
        ModelSpec::new("DBSCAN").with_param("eps", 1.0).with_param("min_samples", 3),
        ModelSpec::new("AgglomerativeClustering").with_param("linkage", "average"),
    ];
    let outcomes = executor().run(TaskKind::Clustering, &specs, &TrainingData::Unsupervised { x });

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(outcomes[0].score.value().is_some());
    assert!(outcomes[1].score.value().is_none());
    assert!(outcomes[2].score.value().is_none());
}

#[test]
fn test_registry_names_match_catalogue() {
    let registry = ModelRegistry::builtin();
    assert_eq!(
        registry.names(TaskKind::Clustering),
        vec!["AgglomerativeClustering", "DBSCAN", "KMeans"]
    );
    assert!(registry.resolve(TaskKind::Classification, "SVR").is_err());
    assert!(registry.resolve(TaskKind::Regression, "SVR").is_ok());
}

#[test]
fn test_conventional_hyperparameter_names_accepted() {
    let registry = ModelRegistry::builtin();
    let specs = [
        (TaskKind::Classification, ModelSpec::new("LogisticRegression").with_param("max_iter", 500).with_param("C", 0.5)),
        (TaskKind::Classification, ModelSpec::new("SVC").with_param("gamma", "auto").with_param("probability", true)),
        (TaskKind::Classification, ModelSpec::new("KNeighborsClassifier").with_param("weights", "distance")),
        (TaskKind::Regression, ModelSpec::new("RandomForestRegressor").with_param("max_features", "sqrt")),
        (TaskKind::Clustering, ModelSpec::new("KMeans").with_param("init", "k-means++").with_param("n_init", 3)),
    ];
    for (task, spec) in specs {
        assert!(registry.construct(task, &spec).is_ok(), "{}", spec.model_name);
    }
}
