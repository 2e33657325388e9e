//! Model registries: one immutable catalogue per task

use super::{
    AgglomerativeClustering, GradientBoostingClassifier, GradientBoostingRegressor, KMeans, KNeighborsClassifier,
    Lasso, LinearRegression, LogisticRegression, Model, RandomForestClassifier, RandomForestRegressor, Ridge, DBSCAN,
    SVC, SVR,
};
use crate::error::{PlanError, Result};
use crate::plan::{ModelSpec, Parameters, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Builds an unfitted model from its hyperparameters
pub type ModelConstructor = fn(&Parameters) -> Result<Box<dyn Model>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegressorKind {
    LinearRegression,
    Ridge,
    Lasso,
    RandomForestRegressor,
    GradientBoostingRegressor,
    SVR,
}

impl RegressorKind {
    pub const ALL: [RegressorKind; 6] = [
        RegressorKind::LinearRegression,
        RegressorKind::Ridge,
        RegressorKind::Lasso,
        RegressorKind::RandomForestRegressor,
        RegressorKind::GradientBoostingRegressor,
        RegressorKind::SVR,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RegressorKind::LinearRegression => "LinearRegression",
            RegressorKind::Ridge => "Ridge",
            RegressorKind::Lasso => "Lasso",
            RegressorKind::RandomForestRegressor => "RandomForestRegressor",
            RegressorKind::GradientBoostingRegressor => "GradientBoostingRegressor",
            RegressorKind::SVR => "SVR",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    fn constructor(self) -> ModelConstructor {
        match self {
            RegressorKind::LinearRegression => |p| Ok(Box::new(LinearRegression::from_params(p)?)),
            RegressorKind::Ridge => |p| Ok(Box::new(Ridge::from_params(p)?)),
            RegressorKind::Lasso => |p| Ok(Box::new(Lasso::from_params(p)?)),
            RegressorKind::RandomForestRegressor => |p| Ok(Box::new(RandomForestRegressor::from_params(p)?)),
            RegressorKind::GradientBoostingRegressor => |p| Ok(Box::new(GradientBoostingRegressor::from_params(p)?)),
            RegressorKind::SVR => |p| Ok(Box::new(SVR::from_params(p)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    LogisticRegression,
    RandomForestClassifier,
    GradientBoostingClassifier,
    SVC,
    KNeighborsClassifier,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 5] = [
        ClassifierKind::LogisticRegression,
        ClassifierKind::RandomForestClassifier,
        ClassifierKind::GradientBoostingClassifier,
        ClassifierKind::SVC,
        ClassifierKind::KNeighborsClassifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClassifierKind::LogisticRegression => "LogisticRegression",
            ClassifierKind::RandomForestClassifier => "RandomForestClassifier",
            ClassifierKind::GradientBoostingClassifier => "GradientBoostingClassifier",
            ClassifierKind::SVC => "SVC",
            ClassifierKind::KNeighborsClassifier => "KNeighborsClassifier",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    fn constructor(self) -> ModelConstructor {
        match self {
            ClassifierKind::LogisticRegression => |p| Ok(Box::new(LogisticRegression::from_params(p)?)),
            ClassifierKind::RandomForestClassifier => |p| Ok(Box::new(RandomForestClassifier::from_params(p)?)),
            ClassifierKind::GradientBoostingClassifier => {
                |p| Ok(Box::new(GradientBoostingClassifier::from_params(p)?))
            }
            ClassifierKind::SVC => |p| Ok(Box::new(SVC::from_params(p)?)),
            ClassifierKind::KNeighborsClassifier => |p| Ok(Box::new(KNeighborsClassifier::from_params(p)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClustererKind {
    KMeans,
    DBSCAN,
    AgglomerativeClustering,
}

impl ClustererKind {
    pub const ALL: [ClustererKind; 3] = [
        ClustererKind::KMeans,
        ClustererKind::DBSCAN,
        ClustererKind::AgglomerativeClustering,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ClustererKind::KMeans => "KMeans",
            ClustererKind::DBSCAN => "DBSCAN",
            ClustererKind::AgglomerativeClustering => "AgglomerativeClustering",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    fn constructor(self) -> ModelConstructor {
        match self {
            ClustererKind::KMeans => |p| Ok(Box::new(KMeans::from_params(p)?)),
            ClustererKind::DBSCAN => |p| Ok(Box::new(DBSCAN::from_params(p)?)),
            ClustererKind::AgglomerativeClustering => |p| Ok(Box::new(AgglomerativeClustering::from_params(p)?)),
        }
    }
}

impl fmt::Display for RegressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ClustererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable mapping from model kind to constructor, per task
#[derive(Clone)]
pub struct ModelRegistry {
    regressors: HashMap<RegressorKind, ModelConstructor>,
    classifiers: HashMap<ClassifierKind, ModelConstructor>,
    clusterers: HashMap<ClustererKind, ModelConstructor>,
}

impl ModelRegistry {
    /// Registry holding every catalogued model
    pub fn builtin() -> Self {
        Self {
            regressors: RegressorKind::ALL.into_iter().map(|k| (k, k.constructor())).collect(),
            classifiers: ClassifierKind::ALL.into_iter().map(|k| (k, k.constructor())).collect(),
            clusterers: ClustererKind::ALL.into_iter().map(|k| (k, k.constructor())).collect(),
        }
    }

    /// Registry without any models
    pub fn empty() -> Self {
        Self {
            regressors: HashMap::new(),
            classifiers: HashMap::new(),
            clusterers: HashMap::new(),
        }
    }

    pub fn with_regressor(mut self, kind: RegressorKind, constructor: ModelConstructor) -> Self {
        self.regressors.insert(kind, constructor);
        self
    }

    pub fn with_classifier(mut self, kind: ClassifierKind, constructor: ModelConstructor) -> Self {
        self.classifiers.insert(kind, constructor);
        self
    }

    pub fn with_clusterer(mut self, kind: ClustererKind, constructor: ModelConstructor) -> Self {
        self.clusterers.insert(kind, constructor);
        self
    }

    /// Look up the constructor for a model name within the task's catalogue
    pub fn resolve(&self, task: TaskKind, name: &str) -> Result<ModelConstructor> {
        let found = match task {
            TaskKind::Regression => RegressorKind::parse(name).and_then(|k| self.regressors.get(&k)),
            TaskKind::Classification => ClassifierKind::parse(name).and_then(|k| self.classifiers.get(&k)),
            TaskKind::Clustering => ClustererKind::parse(name).and_then(|k| self.clusterers.get(&k)),
        };
        found.copied().ok_or_else(|| PlanError::UnknownModel {
            task: task.as_str().to_string(),
            name: name.to_string(),
        })
    }

    /// Resolve and build an unfitted model for a candidate
    pub fn construct(&self, task: TaskKind, spec: &ModelSpec) -> Result<Box<dyn Model>> {
        let constructor = self.resolve(task, &spec.model_name)?;
        constructor(&spec.hyperparameters)
    }

    /// Registered model names for a task, sorted
    pub fn names(&self, task: TaskKind) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = match task {
            TaskKind::Regression => self.regressors.keys().map(|k| k.as_str()).collect(),
            TaskKind::Classification => self.classifiers.keys().map(|k| k.as_str()).collect(),
            TaskKind::Clustering => self.clusterers.keys().map(|k| k.as_str()).collect(),
        };
        names.sort_unstable();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("regressors", &self.names(TaskKind::Regression))
            .field("classifiers", &self.names(TaskKind::Classification))
            .field("clusterers", &self.names(TaskKind::Clustering))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_catalogue_sizes() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.names(TaskKind::Regression).len(), 6);
        assert_eq!(registry.names(TaskKind::Classification).len(), 5);
        assert_eq!(registry.names(TaskKind::Clustering).len(), 3);
    }

    #[test]
    fn test_every_kind_constructs_with_defaults() {
        let registry = ModelRegistry::builtin();
        for task in TaskKind::ALL {
            for name in registry.names(task) {
                let model = registry.construct(task, &ModelSpec::new(name)).unwrap();
                assert_eq!(model.name(), name);
            }
        }
    }

    #[test]
    fn test_name_outside_task_catalogue() {
        let registry = ModelRegistry::builtin();
        let err = registry.resolve(TaskKind::Regression, "LogisticRegression").err().unwrap();
        assert!(matches!(err, PlanError::UnknownModel { .. }));
        assert!(registry.resolve(TaskKind::Clustering, "kmeans").is_err());
    }

    #[test]
    fn test_bad_hyperparameter_is_construction_error() {
        let registry = ModelRegistry::builtin();
        let spec = ModelSpec::new("Ridge").with_param("alpha", json!("high"));
        let err = registry.construct(TaskKind::Regression, &spec).err().unwrap();
        assert!(matches!(err, PlanError::Construction { .. }));

        let spec = ModelSpec::new("KMeans").with_param("n_clustres", 3);
        let err = registry.construct(TaskKind::Clustering, &spec).err().unwrap();
        assert!(matches!(err, PlanError::Construction { .. }));
    }

    #[test]
    fn test_empty_registry_with_one_model() {
        let registry = ModelRegistry::empty().with_clusterer(ClustererKind::KMeans, ClustererKind::KMeans.constructor());
        assert!(registry.resolve(TaskKind::Clustering, "KMeans").is_ok());
        assert!(registry.resolve(TaskKind::Clustering, "DBSCAN").is_err());
    }
}
