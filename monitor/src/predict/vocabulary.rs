use std::collections::HashMap;

// Feature vectors follow SYMPTOMS order. Some names keep the dataset's own
// spelling (`diffculty_breath`, `nasel_discharges`).
pub const SYMPTOMS: &[&str] = &[
    "anorexia", "abdominal_pain", "anaemia", "abortions", "acetone", "aggression",
    "arthrogyposis", "ankylosis", "anxiety", "bellowing", "blood_loss", "blood_poisoning",
    "blisters", "colic", "Condemnation_of_livers", "coughing", "depression", "discomfort",
    "dyspnea", "dysentery", "diarrhoea", "dehydration", "drooling", "dull", "decreased_fertility",
    "diffculty_breath", "emaciation", "encephalitis", "fever", "facial_paralysis",
    "frothing_of_mouth", "frothing", "gaseous_stomach", "highly_diarrhoea", "high_pulse_rate",
    "high_temp", "high_proportion", "hyperaemia", "hydrocephalus", "isolation_from_herd",
    "infertility", "intermittent_fever", "jaundice", "ketosis", "loss_of_appetite", "lameness",
    "lack_of-coordination", "lethargy", "lacrimation", "milk_flakes", "milk_watery", "milk_clots",
    "mild_diarrhoea", "moaning", "mucosal_lesions", "milk_fever", "nausea", "nasel_discharges",
    "oedema", "pain", "painful_tongue", "pneumonia", "photo_sensitization", "quivering_lips",
    "reduction_milk_vields", "rapid_breathing", "rumenstasis", "reduced_rumination",
    "reduced_fertility", "reduced_fat", "reduces_feed_intake", "raised_breathing", "stomach_pain",
    "salivation", "stillbirths", "shallow_breathing", "swollen_pharyngeal", "swelling", "saliva",
    "swollen_tongue", "tachycardia", "torticollis", "udder_swelling", "udder_heat",
    "udder_hardeness", "udder_redness", "udder_pain", "unwillingness_to_move", "ulcers",
    "vomiting", "weight_loss", "weakness",
];

pub const DISEASES: &[&str] = &[
    "mastitis", "blackleg", "bloat", "coccidiosis", "cryptosporidiosis", "displaced_abomasum",
    "gut_worms", "listeriosis", "liver_fluke", "necrotic_enteritis", "peri_weaning_diarrhoea",
    "rift_valley_fever", "rumen_acidosis", "traumatic_reticulitis", "calf_diphtheria", "foot_rot",
    "foot_and_mouth", "ragwort_poisoning", "wooden_tongue", "infectious_bovine_rhinotracheitis",
    "acetonaemia", "fatty_liver_syndrome", "calf_pneumonia", "schmallen_berg_virus",
    "trypanosomosis", "fog_fever",
];

/// Maps symptom names to feature columns.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symptoms: &'static [&'static str],
    diseases: &'static [&'static str],
    index: HashMap<&'static str, usize>,
}

impl Vocabulary {
    pub fn new(symptoms: &'static [&'static str], diseases: &'static [&'static str]) -> Self {
        let index = symptoms.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        Self {
            symptoms,
            diseases,
            index,
        }
    }

    pub fn symptoms(&self) -> &'static [&'static str] {
        self.symptoms
    }

    pub fn diseases(&self) -> &'static [&'static str] {
        self.diseases
    }

    pub fn symptom_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn disease_index(&self, name: &str) -> Option<usize> {
        self.diseases.iter().position(|d| *d == name)
    }

    pub fn disease(&self, label: usize) -> Option<&'static str> {
        self.diseases.get(label).copied()
    }

    /// One-hot feature vector. Names are matched exactly; unknown names are
    /// ignored and repeats set the same column.
    pub fn encode<S: AsRef<str>>(&self, symptoms: &[S]) -> Vec<f64> {
        let mut features = vec![0.0; self.symptoms.len()];
        for name in symptoms {
            if let Some(i) = self.symptom_index(name.as_ref()) {
                features[i] = 1.0;
            }
        }
        features
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(SYMPTOMS, DISEASES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_sizes() {
        assert_eq!(SYMPTOMS.len(), 92);
        assert_eq!(DISEASES.len(), 26);
        assert_eq!(SYMPTOMS[0], "anorexia");
        assert_eq!(DISEASES[0], "mastitis");
        assert_eq!(DISEASES[25], "fog_fever");
    }

    #[test]
    fn encode_sets_known_columns_only() {
        let vocab = Vocabulary::default();
        let v = vocab.encode(&["fever", "coughing", "fever", "purple_spots", "Fever"]);
        assert_eq!(v.len(), SYMPTOMS.len());
        assert_eq!(v.iter().filter(|x| **x == 1.0).count(), 2);
        assert_eq!(v[vocab.symptom_index("fever").unwrap()], 1.0);
        assert_eq!(v[vocab.symptom_index("coughing").unwrap()], 1.0);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let vocab = Vocabulary::default();
        let none: [&str; 0] = [];
        assert!(vocab.encode(&none).iter().all(|x| *x == 0.0));
    }

    #[test]
    fn dataset_spellings_are_kept() {
        let vocab = Vocabulary::default();
        assert!(vocab.symptom_index("Condemnation_of_livers").is_some());
        assert!(vocab.symptom_index("lack_of-coordination").is_some());
        assert_eq!(vocab.disease_index("bloat"), Some(2));
        assert_eq!(vocab.disease(2), Some("bloat"));
        assert_eq!(vocab.disease(26), None);
    }
}
