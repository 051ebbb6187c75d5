use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};

/// Small helper trait to pull typed values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn element_f64(&self, tag: Tag) -> Option<f64>;
    fn element_multi_f64(&self, tag: Tag) -> Option<Vec<f64>>;
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
    }

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        self.element(tag).ok().and_then(|e| e.to_float64().ok())
    }

    fn element_multi_f64(&self, tag: Tag) -> Option<Vec<f64>> {
        self.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
    }
}

// File objects deref to their in-memory dataset.
impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn element_f64(&self, tag: Tag) -> Option<f64> {
        (**self).element_f64(tag)
    }

    fn element_multi_f64(&self, tag: Tag) -> Option<Vec<f64>> {
        (**self).element_multi_f64(tag)
    }
}
